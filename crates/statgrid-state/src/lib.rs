//! statgrid-state — embedded state store for statgrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds session packet sets,
//! collector sets, job records, and the save archive.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Each concern lives in its own table, so packet sets keyed by token and
//! job records keyed by job id never collide.
//!
//! Expiry is stored alongside the data (`expires_at`, Unix seconds) and
//! checked on read; expired records are invisible before the janitor
//! physically removes them.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{JobsTxn, StateStore};
pub use types::*;
