//! Save sinks — where accepted packet batches are durably written.

use std::sync::Arc;

use statgrid_core::{SinkKind, epoch_secs};
use statgrid_state::{ArchivedBatch, PacketMap, StateStore};
use tracing::{debug, info};

/// Durable destination for packet batches.
///
/// `Ok(false)` and `Err` both mean the batch was not saved; callers log and
/// move on.
pub trait SaveSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn save(&self, token: &str, atime: u64, packets: &PacketMap) -> anyhow::Result<bool>;
}

/// Appends batches to the store's archive table.
pub struct ArchiveSink {
    store: StateStore,
}

impl ArchiveSink {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl SaveSink for ArchiveSink {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn save(&self, token: &str, atime: u64, packets: &PacketMap) -> anyhow::Result<bool> {
        let batch = ArchivedBatch {
            token: token.to_string(),
            atime,
            packets: packets.clone(),
            archived_at: epoch_secs(),
        };
        let key = self.store.archive_batch(&batch)?;
        debug!(%token, %key, "batch saved to archive");
        Ok(true)
    }
}

/// Logs batches and drops them.
pub struct DiscardSink;

impl SaveSink for DiscardSink {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn save(&self, token: &str, atime: u64, packets: &PacketMap) -> anyhow::Result<bool> {
        info!(%token, atime, packets = packets.len(), "batch discarded");
        Ok(true)
    }
}

/// Build the sink selected in configuration.
pub fn build_sink(kind: SinkKind, store: &StateStore) -> Arc<dyn SaveSink> {
    match kind {
        SinkKind::Archive => Arc::new(ArchiveSink::new(store.clone())),
        SinkKind::Discard => Arc::new(DiscardSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statgrid_state::PacketEntry;

    fn batch() -> PacketMap {
        let mut packets = PacketMap::new();
        packets.insert("1:2:3:4:5:6:7".to_string(), PacketEntry::new("1:2:3"));
        packets
    }

    #[test]
    fn archive_sink_persists() {
        let store = StateStore::open_in_memory().unwrap();
        let sink = build_sink(SinkKind::Archive, &store);
        assert_eq!(sink.name(), "archive");
        assert!(sink.save("t1", 1000, &batch()).unwrap());

        let archived = store.list_archive("t1").unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].atime, 1000);
        assert_eq!(archived[0].packets, batch());
    }

    #[test]
    fn discard_sink_stores_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let sink = build_sink(SinkKind::Discard, &store);
        assert_eq!(sink.name(), "discard");
        assert!(sink.save("t1", 1000, &batch()).unwrap());
        assert!(store.list_archive("t1").unwrap().is_empty());
    }
}
