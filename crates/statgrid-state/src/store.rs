//! StateStore — redb-backed persistence for statgrid.
//!
//! Typed operations over session packet sets, collector sets, job records,
//! and the save archive. Values are JSON-serialized into redb's `&[u8]`
//! value columns. Both on-disk and in-memory backends are supported (the
//! latter for tests).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// Job table opened inside a single write transaction.
///
/// Everything done through one `JobsTxn` commits atomically, or not at all
/// when the closure passed to [`StateStore::with_jobs`] fails.
pub struct JobsTxn<'txn> {
    table: Table<'txn, &'static str, &'static [u8]>,
}

impl JobsTxn<'_> {
    pub fn get(&self, id: &str) -> StateResult<Option<JobRecord>> {
        match self.table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(id, guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn put(&mut self, record: &JobRecord) -> StateResult<()> {
        let value = encode(record)?;
        self.table
            .insert(record.id.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Returns true if the record existed.
    pub fn remove(&mut self, id: &str) -> StateResult<bool> {
        Ok(self.table.remove(id).map_err(map_err!(Write))?.is_some())
    }
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PACKETS).map_err(map_err!(Table))?;
        txn.open_table(COLLECTORS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(ARCHIVE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Packets ────────────────────────────────────────────────────

    /// Merge `packets` into the session set of `token` and reset its expiry
    /// to `now + ttl_secs`, in one write transaction.
    ///
    /// An expired set is replaced rather than merged into.
    pub fn merge_packets(
        &self,
        token: &str,
        packets: &PacketMap,
        now: u64,
        ttl_secs: u64,
    ) -> StateResult<PacketSet> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let set = {
            let mut table = txn.open_table(PACKETS).map_err(map_err!(Table))?;
            let existing: Option<PacketSet> = match table.get(token).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(token, guard.value())?),
                None => None,
            };
            let mut set = match existing {
                Some(set) if !set.is_expired(now) => set,
                _ => PacketSet {
                    token: token.to_string(),
                    entries: PacketMap::new(),
                    expires_at: now,
                },
            };
            set.entries
                .extend(packets.iter().map(|(k, v)| (k.clone(), v.clone())));
            set.expires_at = now.saturating_add(ttl_secs);

            let value = encode(&set)?;
            table
                .insert(token, value.as_slice())
                .map_err(map_err!(Write))?;
            set
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%token, merged = packets.len(), total = set.entries.len(), "packets merged");
        Ok(set)
    }

    /// Current packets of `token`; empty when absent or expired.
    pub fn get_packets(&self, token: &str, now: u64) -> StateResult<PacketMap> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PACKETS).map_err(map_err!(Table))?;
        match table.get(token).map_err(map_err!(Read))? {
            Some(guard) => {
                let set: PacketSet = decode(token, guard.value())?;
                if set.is_expired(now) {
                    Ok(PacketMap::new())
                } else {
                    Ok(set.entries)
                }
            }
            None => Ok(PacketMap::new()),
        }
    }

    /// Drop the packet set of `token`. Returns true if it existed.
    pub fn remove_packets(&self, token: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PACKETS).map_err(map_err!(Table))?;
            existed = table.remove(token).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%token, existed, "packets removed");
        Ok(existed)
    }

    /// Physically remove every expired packet set. Returns number removed.
    pub fn purge_expired_packets(&self, now: u64) -> StateResult<usize> {
        self.purge_expired(PACKETS, |bytes, key| {
            let set: PacketSet = decode(key, bytes)?;
            Ok(set.is_expired(now))
        })
    }

    // ── Collectors ─────────────────────────────────────────────────

    /// Add `tokens` to the collector set of `stat`, keeping first-insertion
    /// order. Returns the full membership after the update.
    pub fn add_to_collector(&self, stat: &str, tokens: &[String]) -> StateResult<Vec<String>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let members = {
            let mut table = txn.open_table(COLLECTORS).map_err(map_err!(Table))?;
            let mut members: Vec<String> = match table.get(stat).map_err(map_err!(Read))? {
                Some(guard) => decode(stat, guard.value())?,
                None => Vec::new(),
            };
            for token in tokens {
                if !members.contains(token) {
                    members.push(token.clone());
                }
            }
            let value = encode(&members)?;
            table
                .insert(stat, value.as_slice())
                .map_err(map_err!(Write))?;
            members
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(members)
    }

    pub fn get_collector(&self, stat: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COLLECTORS).map_err(map_err!(Table))?;
        match table.get(stat).map_err(map_err!(Read))? {
            Some(guard) => decode(stat, guard.value()),
            None => Ok(Vec::new()),
        }
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Run `f` against the job table inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts otherwise.
    pub fn with_jobs<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut JobsTxn<'_>) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self
            .db
            .begin_write()
            .map_err(map_err!(Transaction))
            .map_err(E::from)?;
        let outcome = {
            let table = txn
                .open_table(JOBS)
                .map_err(map_err!(Table))
                .map_err(E::from)?;
            let mut jobs = JobsTxn { table };
            f(&mut jobs)
        };
        match outcome {
            Ok(value) => {
                txn.commit()
                    .map_err(map_err!(Transaction))
                    .map_err(E::from)?;
                Ok(value)
            }
            Err(e) => {
                txn.abort()
                    .map_err(map_err!(Transaction))
                    .map_err(E::from)?;
                Err(e)
            }
        }
    }

    /// Store a single job record.
    pub fn put_job(&self, record: &JobRecord) -> StateResult<()> {
        self.with_jobs(|jobs| jobs.put(record))
    }

    /// Get a job record, expired or not.
    pub fn get_job(&self, id: &str) -> StateResult<Option<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(id, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get a job record, treating an expired one as absent.
    pub fn get_live_job(&self, id: &str, now: u64) -> StateResult<Option<JobRecord>> {
        Ok(self.get_job(id)?.filter(|record| !record.is_expired(now)))
    }

    /// List every job record.
    pub fn list_jobs(&self) -> StateResult<Vec<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(key.value(), value.value())?);
        }
        Ok(results)
    }

    /// Physically remove every expired job record. Returns number removed.
    pub fn purge_expired_jobs(&self, now: u64) -> StateResult<usize> {
        self.purge_expired(JOBS, |bytes, key| {
            let record: JobRecord = decode(key, bytes)?;
            Ok(record.is_expired(now))
        })
    }

    // ── Archive ────────────────────────────────────────────────────

    /// Append a batch under `{token}:{atime}:{seq}`. Returns the key used.
    pub fn archive_batch(&self, batch: &ArchivedBatch) -> StateResult<String> {
        let prefix = ArchivedBatch::key_prefix(&batch.token, batch.atime);
        let value = encode(batch)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key = {
            let mut table = txn.open_table(ARCHIVE).map_err(map_err!(Table))?;
            let mut seq = 0usize;
            for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                seq += 1;
            }
            let key = format!("{prefix}{seq:06}");
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            key
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, packets = batch.packets.len(), "batch archived");
        Ok(key)
    }

    /// Archived batches of `token`, oldest first.
    pub fn list_archive(&self, token: &str) -> StateResult<Vec<ArchivedBatch>> {
        let prefix = format!("{token}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ARCHIVE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let batch: ArchivedBatch = decode(key.value(), value.value())?;
            // Tokens may themselves contain ':'.
            if batch.token == token {
                results.push(batch);
            }
        }
        Ok(results)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn purge_expired<F>(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
        is_expired: F,
    ) -> StateResult<usize>
    where
        F: Fn(&[u8], &str) -> StateResult<bool>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if is_expired(value.value(), key.value())? {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            count = expired.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if count > 0 {
            debug!(table = definition.name(), count, "expired records purged");
        }
        Ok(count)
    }
}
