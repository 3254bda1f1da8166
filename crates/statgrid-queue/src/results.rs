//! Result cache and aggregator.

use serde_json::Value;
use statgrid_core::{collector_job_id, compute_job_id, epoch_secs};
use tracing::debug;

use crate::context::StatContext;
use crate::error::QueueResult;

/// Result of the compute job for `(stat, token)`, if it has finished.
///
/// Never waits. A successful read extends the job's retention to
/// `jobs.result_cache_secs` from now, so polling keeps the result alive.
pub fn pull_result(ctx: &StatContext, stat: &str, token: &str) -> QueueResult<Option<Value>> {
    let id = compute_job_id(stat, token);
    let now = epoch_secs();
    let cache_secs = ctx.config.jobs.result_cache_secs;

    ctx.store.with_jobs(|jobs| -> QueueResult<Option<Value>> {
        let Some(mut record) = jobs.get(&id)?.filter(|r| !r.is_expired(now)) else {
            return Ok(None);
        };
        let Some(result) = record.finished_result().cloned() else {
            return Ok(None);
        };
        record.ttl_secs = Some(cache_secs);
        record.result_ttl_secs = Some(cache_secs);
        record.expires_at = Some(now.saturating_add(cache_secs));
        jobs.put(&record)?;
        debug!(job_id = %id, cache_secs, "result served, retention extended");
        Ok(Some(result))
    })
}

/// Every available compute result for `stat`, in collector membership order.
///
/// `None` until the collector job has finished. Reads do not extend
/// retention, and tokens without a result are skipped.
pub fn pull_all_results(ctx: &StatContext, stat: &str) -> QueueResult<Option<Vec<Value>>> {
    let now = epoch_secs();
    let Some(collector) = ctx.store.get_live_job(&collector_job_id(stat), now)? else {
        return Ok(None);
    };
    let Some(snapshot) = collector.finished_result() else {
        return Ok(None);
    };

    let tokens = snapshot
        .as_array()
        .map(|members| members.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut results = Vec::with_capacity(tokens.len());
    for token in tokens {
        let job = ctx.store.get_live_job(&compute_job_id(stat, token), now)?;
        if let Some(result) = job.as_ref().and_then(|j| j.finished_result()) {
            results.push(result.clone());
        }
    }
    Ok(Some(results))
}
