//! Stat registry — the set of statistics the service knows how to compute.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use statgrid_core::Packet;

use crate::error::{QueueError, QueueResult};
use crate::stats::{AvgRespTime, TopsOfLocs};

/// A named reducer over the decoded packets of one session.
///
/// Implementations run on the blocking pool and must not touch the store.
pub trait Computable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reduce `packets` to a JSON result. A `null` result counts as none.
    fn compute(&self, packets: &[Packet]) -> anyhow::Result<Value>;
}

/// Stat name → reducer.
#[derive(Clone, Default)]
pub struct StatRegistry {
    stats: HashMap<&'static str, Arc<dyn Computable>>,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `avg_resp_time` and `tops_of_locs`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AvgRespTime));
        registry.register(Arc::new(TopsOfLocs));
        registry
    }

    /// Add a reducer, replacing any previous one under the same name.
    pub fn register(&mut self, stat: Arc<dyn Computable>) {
        self.stats.insert(stat.name(), stat);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stats.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Computable>> {
        self.stats.get(name).cloned()
    }

    /// Look up `name`, failing with [`QueueError::UnknownStat`].
    pub fn resolve(&self, name: &str) -> QueueResult<Arc<dyn Computable>> {
        self.get(name)
            .ok_or_else(|| QueueError::UnknownStat(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.stats.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
