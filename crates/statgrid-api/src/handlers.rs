//! REST API handlers.
//!
//! Handlers parse the body, call into `statgrid_queue`, and wrap the outcome
//! in an [`Envelope`]. Errors are reported in the envelope as well as in the
//! HTTP status.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statgrid_core::calc_checksum;
use statgrid_queue::{
    IngestOutcome, QueueError, ingest, ingest_and_schedule, pull_all_results, pull_result,
    schedule,
};
use tracing::{debug, error};

use crate::ApiState;
use crate::payload::Payload;

/// JSON body of every response.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Envelope {
    pub fn failure(status: StatusCode) -> Self {
        Self {
            error: true,
            status: Some(status.as_u16()),
            ..Self::default()
        }
    }

    pub fn accepted(checksum: String, job_id: Option<String>) -> Self {
        Self {
            checksum: Some(checksum),
            job_id,
            ..Self::default()
        }
    }

    /// `result` is always present; `null` when nothing is available yet.
    pub fn result(value: Option<Value>) -> Self {
        Self {
            result: Some(value.unwrap_or(Value::Null)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveQuery {
    #[serde(default)]
    pub sync: bool,
}

type QueryParams = Result<Query<SaveQuery>, QueryRejection>;

fn ok(envelope: Envelope) -> Response {
    (StatusCode::OK, Json(envelope)).into_response()
}

fn error_response(status: StatusCode) -> Response {
    (status, Json(Envelope::failure(status))).into_response()
}

fn queue_error(err: QueueError) -> Response {
    match err {
        QueueError::UnknownStat(stat) => {
            debug!(%stat, "unknown stat");
            error_response(StatusCode::NOT_FOUND)
        }
        QueueError::State(e) => {
            error!(error = %e, "state store failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Shared body of the four ingest routes.
///
/// `multi` selects the batch payload shape, `recalc` schedules the `stat`
/// named in the body after a successful ingest.
fn process_data(
    state: &ApiState,
    token: &str,
    query: QueryParams,
    body: &Bytes,
    multi: bool,
    recalc: bool,
) -> Response {
    let Ok(Query(query)) = query else {
        return error_response(StatusCode::BAD_REQUEST);
    };
    let Some(payload) = Payload::parse(body) else {
        return error_response(StatusCode::BAD_REQUEST);
    };

    let packets = payload.packets(multi);
    let outcome = if recalc {
        let Some(stat) = payload.stat.as_deref() else {
            return error_response(StatusCode::NOT_FOUND);
        };
        ingest_and_schedule(&state.ctx, token, stat, &packets, query.sync)
    } else {
        ingest(&state.ctx, token, &packets, query.sync)
    };

    match outcome {
        Ok(IngestOutcome::Accepted { job_id, .. }) => {
            ok(Envelope::accepted(calc_checksum(body), job_id))
        }
        Ok(IngestOutcome::Rejected) => error_response(StatusCode::BAD_REQUEST),
        Err(e) => queue_error(e),
    }
}

// ── Ingest ─────────────────────────────────────────────────────

/// PUT /stats/put/{token}
pub async fn stats_put(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    query: QueryParams,
    body: Bytes,
) -> Response {
    process_data(&state, &token, query, &body, false, false)
}

/// PUT /stats/mput/{token}
pub async fn stats_mput(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    query: QueryParams,
    body: Bytes,
) -> Response {
    process_data(&state, &token, query, &body, true, false)
}

/// PUT /stats/ar_put/{token}
pub async fn stats_ar_put(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    query: QueryParams,
    body: Bytes,
) -> Response {
    process_data(&state, &token, query, &body, false, true)
}

/// PUT /stats/ar_mput/{token}
pub async fn stats_ar_mput(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    query: QueryParams,
    body: Bytes,
) -> Response {
    process_data(&state, &token, query, &body, true, true)
}

/// PUT /stats/proc_enq/{token}
///
/// Body is `{"stat": ...}`; nothing is ingested.
pub async fn stats_proc_enq(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    let Some(payload) = Payload::parse(&body).filter(|p| p.wrapped) else {
        return error_response(StatusCode::BAD_REQUEST);
    };
    let Some(stat) = payload.stat.as_deref() else {
        return error_response(StatusCode::NOT_FOUND);
    };
    match schedule(&state.ctx, stat, &token) {
        Ok(job_id) => ok(Envelope::accepted(calc_checksum(&body), Some(job_id))),
        Err(e) => queue_error(e),
    }
}

// ── Results ────────────────────────────────────────────────────

/// GET /stats/result/{stat}/{token}
pub async fn stats_result(
    State(state): State<ApiState>,
    Path((stat, token)): Path<(String, String)>,
) -> Response {
    if !state.ctx.registry.contains(&stat) {
        return error_response(StatusCode::NOT_FOUND);
    }
    match pull_result(&state.ctx, &stat, &token) {
        Ok(result) => ok(Envelope::result(result)),
        Err(e) => queue_error(e),
    }
}

/// GET /stats/results/{stat}
pub async fn stats_results(
    State(state): State<ApiState>,
    Path(stat): Path<String>,
) -> Response {
    if !state.ctx.registry.contains(&stat) {
        return error_response(StatusCode::NOT_FOUND);
    }
    match pull_all_results(&state.ctx, &stat) {
        Ok(results) => ok(Envelope::result(results.map(Value::from))),
        Err(e) => queue_error(e),
    }
}

// ── Fallbacks ──────────────────────────────────────────────────

pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND)
}

pub async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED)
}
