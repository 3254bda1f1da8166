//! Pipeline error types.

use thiserror::Error;

/// Errors surfaced by ingest, scheduling, and result lookups.
///
/// Per-packet validation failures and job failures never appear here: the
/// former are dropped, the latter are recorded on the job.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown stat: {0}")]
    UnknownStat(String),

    #[error("state store error: {0}")]
    State(#[from] statgrid_state::StateError),
}

pub type QueueResult<T> = Result<T, QueueError>;
