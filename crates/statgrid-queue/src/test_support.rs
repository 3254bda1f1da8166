//! Fixtures shared by the unit tests of this crate.

use statgrid_core::StatgridConfig;
use statgrid_state::{PacketEntry, PacketMap, StateStore};

use crate::context::StatContext;
use crate::registry::StatRegistry;

pub fn context_with(config: StatgridConfig, registry: StatRegistry) -> StatContext {
    StatContext::new(StateStore::open_in_memory().unwrap(), config, registry)
}

pub fn test_context() -> StatContext {
    context_with(StatgridConfig::default(), StatRegistry::with_builtins())
}

pub fn packet_map(pairs: &[(&str, &str)]) -> PacketMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), PacketEntry::new(*v)))
        .collect()
}
