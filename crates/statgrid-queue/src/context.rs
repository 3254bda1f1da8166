//! Shared handles every pipeline operation runs against.

use std::sync::Arc;

use statgrid_core::{PacketCodec, StatgridConfig};
use statgrid_state::StateStore;

use crate::queue::JobQueues;
use crate::registry::StatRegistry;
use crate::sink::{SaveSink, build_sink};

/// Store, configuration, stat registry, save sink, and queues.
///
/// Cheap to clone; all clones share the same queues and store.
#[derive(Clone)]
pub struct StatContext {
    pub store: StateStore,
    pub config: Arc<StatgridConfig>,
    pub registry: Arc<StatRegistry>,
    pub sink: Arc<dyn SaveSink>,
    pub queues: JobQueues,
}

impl StatContext {
    /// Context using the sink selected by `config.save.sink`.
    pub fn new(store: StateStore, config: StatgridConfig, registry: StatRegistry) -> Self {
        let sink = build_sink(config.save.sink, &store);
        Self {
            store,
            config: Arc::new(config),
            registry: Arc::new(registry),
            sink,
            queues: JobQueues::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SaveSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn codec(&self) -> PacketCodec {
        self.config.packet_codec()
    }
}
