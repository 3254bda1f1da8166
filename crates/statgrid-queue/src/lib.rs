//! statgrid-queue — the asynchronous stat pipeline.
//!
//! Ingests packets into the session store, schedules collector and compute
//! jobs with deterministic ids, runs them on a tokio worker pool, and serves
//! cached results.
//!
//! # Architecture
//!
//! ```text
//! ingest ──► StateStore (packets) ──► save queue ──► SaveSink
//!    │
//!    └─► scheduler ──► calc queue ──► WorkerPool
//!                        stat:{stat}          collector
//!                        stat:{stat}:{token}  compute (after collector)
//!
//! results ◄── job records (TTL extended on read)
//! Janitor ──► purges expired packet sets and job records
//! ```
//!
//! Every operation takes an explicit [`StatContext`].

pub mod context;
pub mod error;
pub mod ingest;
pub mod janitor;
pub mod queue;
pub mod registry;
pub mod results;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use context::StatContext;
pub use error::{QueueError, QueueResult};
pub use ingest::{IngestOutcome, RawPacket, ingest, ingest_and_schedule, schedule};
pub use janitor::{Janitor, SweepReport};
pub use queue::{JobQueue, JobQueues};
pub use registry::{Computable, StatRegistry};
pub use results::{pull_all_results, pull_result};
pub use scheduler::{direct_save, submit_compute, submit_save};
pub use sink::{ArchiveSink, DiscardSink, SaveSink, build_sink};
pub use worker::{RecoveryReport, WorkerPool};
