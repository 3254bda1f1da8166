//! redb table definitions for the statgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Session packet sets keyed by `{token}`.
pub const PACKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("packets");

/// Collector sets (ordered token lists) keyed by `{stat}`.
pub const COLLECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("collectors");

/// Job records keyed by job id (`stat:{stat}`, `stat:{stat}:{token}`, `save:{uuid}`).
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Saved packet batches keyed by `{token}:{atime}:{seq}`.
pub const ARCHIVE: TableDefinition<&str, &[u8]> = TableDefinition::new("archive");
