//! statgrid-api — HTTP API for statgrid.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/stats/put/{token}` | Ingest one packet |
//! | PUT | `/stats/mput/{token}` | Ingest many packets |
//! | PUT | `/stats/ar_put/{token}` | Ingest one packet and schedule `stat` |
//! | PUT | `/stats/ar_mput/{token}` | Ingest many packets and schedule `stat` |
//! | PUT | `/stats/proc_enq/{token}` | Schedule `stat` |
//! | GET | `/stats/result/{stat}/{token}` | One compute result |
//! | GET | `/stats/results/{stat}` | All results for `stat` |
//!
//! Ingest routes accept `?sync=true` to save the batch inline instead of
//! through the save queue. Every response, errors included, is a JSON
//! envelope: `{"error": bool, "status"?, "checksum"?, "job_id"?, "result"?}`.

pub mod handlers;
pub mod payload;

use axum::Router;
use axum::routing::{get, put};
use statgrid_queue::StatContext;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: StatContext,
}

/// Build the complete API router.
pub fn build_router(ctx: StatContext) -> Router {
    let state = ApiState { ctx };

    Router::new()
        .route("/stats/put/{token}", put(handlers::stats_put))
        .route("/stats/mput/{token}", put(handlers::stats_mput))
        .route("/stats/ar_put/{token}", put(handlers::stats_ar_put))
        .route("/stats/ar_mput/{token}", put(handlers::stats_ar_mput))
        .route("/stats/proc_enq/{token}", put(handlers::stats_proc_enq))
        .route("/stats/result/{stat}/{token}", get(handlers::stats_result))
        .route("/stats/results/{stat}", get(handlers::stats_results))
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .fallback(handlers::not_found)
        .with_state(state)
}
