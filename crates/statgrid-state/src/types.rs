//! Domain types for the statgrid state store.
//!
//! These types represent the persisted state of session packet sets, jobs,
//! and archived save batches. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use statgrid_core::{JobId, Packet, PacketCodec, QueueName, SessionToken};

// ── Packets ───────────────────────────────────────────────────────

/// Stored value of one packet: the raw `value` string plus its optional
/// raw `result` string, both still `:`-delimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacketEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl PacketEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            result: None,
        }
    }

    pub fn with_result(value: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            result: Some(result.into()),
        }
    }
}

/// Raw packet key → stored entry.
pub type PacketMap = BTreeMap<String, PacketEntry>;

/// All packets of one session, sharing a single expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacketSet {
    pub token: SessionToken,
    pub entries: PacketMap,
    /// Unix timestamp after which the set is gone.
    pub expires_at: u64,
}

impl PacketSet {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Decode a stored packet map, skipping entries the codec rejects.
pub fn decode_entries(codec: &PacketCodec, entries: &PacketMap) -> Vec<Packet> {
    codec.decode_all(
        entries
            .iter()
            .map(|(key, entry)| (key.as_str(), entry.value.as_str(), entry.result.as_deref())),
    )
}

// ── Jobs ──────────────────────────────────────────────────────────

/// Lifecycle of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its dependency to finish; not runnable.
    Deferred,
    /// Runnable, waiting for a worker.
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobState {
    /// Deferred or Queued: not yet picked up by a worker.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Deferred | JobState::Queued)
    }

    /// Finished or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

/// What a job does when it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Register `tokens` in the collector set of `stat`.
    Collect { stat: String, tokens: Vec<SessionToken> },
    /// Run the reducer of `stat` over the packets of `token`.
    Compute { stat: String, token: SessionToken },
    /// Hand a packet batch to the configured save sink.
    Save {
        token: SessionToken,
        atime: u64,
        packets: PacketMap,
    },
}

/// Persisted job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: QueueName,
    pub kind: JobKind,
    pub state: JobState,
    /// Job that must finish before this one becomes runnable.
    pub depends_on: Option<JobId>,
    /// Jobs waiting on this one.
    #[serde(default)]
    pub dependents: Vec<JobId>,
    pub timeout_secs: u64,
    /// Liveness before pickup; `None` means unlimited.
    pub ttl_secs: Option<u64>,
    /// Result retention after completion; `None` means keep.
    pub result_ttl_secs: Option<u64>,
    /// Unix timestamp after which the record is gone.
    pub expires_at: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// A resubmission arrived while running; run again once done.
    #[serde(default)]
    pub follow_up: bool,
    pub enqueued_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl JobRecord {
    /// A fresh Queued record with no dependency and unlimited retention.
    pub fn new(id: JobId, queue: QueueName, kind: JobKind, timeout_secs: u64, now: u64) -> Self {
        Self {
            id,
            queue,
            kind,
            state: JobState::Queued,
            depends_on: None,
            dependents: Vec::new(),
            timeout_secs,
            ttl_secs: None,
            result_ttl_secs: None,
            expires_at: None,
            result: None,
            error: None,
            follow_up: false,
            enqueued_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Result of a finished job, if it produced a non-null one.
    pub fn finished_result(&self) -> Option<&Value> {
        match (self.state, &self.result) {
            (JobState::Finished, Some(value)) if !value.is_null() => Some(value),
            _ => None,
        }
    }

    pub fn add_dependent(&mut self, id: &str) {
        if !self.dependents.iter().any(|d| d == id) {
            self.dependents.push(id.to_string());
        }
    }
}

// ── Archive ───────────────────────────────────────────────────────

/// Packet batch persisted by the archive save sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedBatch {
    pub token: SessionToken,
    /// Time the batch was accepted (Unix seconds).
    pub atime: u64,
    pub packets: PacketMap,
    pub archived_at: u64,
}

impl ArchivedBatch {
    /// Key prefix shared by batches of `token` accepted at `atime`.
    pub fn key_prefix(token: &str, atime: u64) -> String {
        format!("{token}:{atime}:")
    }
}
