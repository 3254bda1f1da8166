//! Job scheduler — deterministic-identity job submission.
//!
//! A compute request produces two jobs on the `calc` queue:
//!
//! ```text
//! stat:{stat}            collector, registers tokens under the stat
//!   └── stat:{stat}:{token}   compute, Deferred until the collector finishes
//! ```
//!
//! Resubmitting the same `(stat, token)` re-targets the existing records
//! instead of duplicating them. A job that is already running is never
//! preempted; it is flagged `follow_up` and runs once more after the
//! current run completes.

use statgrid_core::{
    JobId, QueueName, SAVE_ID_PREFIX, collector_job_id, compute_job_id, epoch_secs,
};
use statgrid_state::{JobKind, JobRecord, JobState, PacketMap};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::StatContext;
use crate::error::QueueResult;

/// Schedule the collector/compute pair for `(stat, token)`.
///
/// Returns the compute job id without waiting for anything to run. Both
/// records are written in one store transaction.
pub fn submit_compute(ctx: &StatContext, stat: &str, token: &str) -> QueueResult<JobId> {
    ctx.registry.resolve(stat)?;

    let now = epoch_secs();
    let timeout_secs = ctx.config.jobs.timeout_secs;
    let collector_id = collector_job_id(stat);
    let compute_id = compute_job_id(stat, token);

    let to_push = ctx.store.with_jobs(|jobs| -> QueueResult<Vec<JobId>> {
        let mut to_push = Vec::new();

        let mut collector = match jobs.get(&collector_id)? {
            Some(mut record) if !record.is_expired(now) && !record.state.is_terminal() => {
                if let JobKind::Collect { tokens, .. } = &mut record.kind {
                    if !tokens.iter().any(|t| t == token) {
                        tokens.push(token.to_string());
                    }
                }
                if record.state == JobState::Running {
                    record.follow_up = true;
                }
                debug!(job_id = %collector_id, state = ?record.state, "collector reused");
                record
            }
            _ => {
                to_push.push(collector_id.clone());
                JobRecord::new(
                    collector_id.clone(),
                    QueueName::Calc,
                    JobKind::Collect {
                        stat: stat.to_string(),
                        tokens: vec![token.to_string()],
                    },
                    timeout_secs,
                    now,
                )
            }
        };

        match jobs.get(&compute_id)?.filter(|r| !r.is_expired(now)) {
            Some(mut record) if record.state == JobState::Running => {
                record.follow_up = true;
                jobs.put(&record)?;
                debug!(job_id = %compute_id, "compute running, follow-up requested");
            }
            Some(mut record) if record.state.is_pending() => {
                if record.state == JobState::Deferred {
                    record.depends_on = Some(collector_id.clone());
                    collector.add_dependent(&compute_id);
                    jobs.put(&record)?;
                }
                debug!(job_id = %compute_id, state = ?record.state, "compute re-targeted");
            }
            _ => {
                let mut record = JobRecord::new(
                    compute_id.clone(),
                    QueueName::Calc,
                    JobKind::Compute {
                        stat: stat.to_string(),
                        token: token.to_string(),
                    },
                    timeout_secs,
                    now,
                );
                record.state = JobState::Deferred;
                record.depends_on = Some(collector_id.clone());
                collector.add_dependent(&compute_id);
                jobs.put(&record)?;
            }
        }

        jobs.put(&collector)?;
        Ok(to_push)
    })?;

    for id in to_push {
        ctx.queues.push(QueueName::Calc, id);
    }
    info!(%stat, %token, job_id = %compute_id, "compute submitted");
    Ok(compute_id)
}

/// Enqueue a fire-and-forget save of `packets` on the `save` queue.
///
/// `atime` defaults to now. Failures of the save itself are only logged.
pub fn submit_save(
    ctx: &StatContext,
    token: &str,
    packets: &PacketMap,
    atime: Option<u64>,
) -> QueueResult<JobId> {
    let now = epoch_secs();
    let id = format!("{SAVE_ID_PREFIX}:{}", Uuid::new_v4());
    let mut record = JobRecord::new(
        id.clone(),
        QueueName::Save,
        JobKind::Save {
            token: token.to_string(),
            atime: atime.unwrap_or(now),
            packets: packets.clone(),
        },
        ctx.config.jobs.timeout_secs,
        now,
    );
    record.result_ttl_secs = Some(ctx.config.jobs.save_result_ttl_secs);
    ctx.store.put_job(&record)?;
    ctx.queues.push(QueueName::Save, id.clone());
    debug!(%token, job_id = %id, packets = packets.len(), "save submitted");
    Ok(id)
}

/// Save `packets` through the configured sink on the caller's task.
///
/// Never fails: sink errors and refusals are logged and reported as `false`.
pub fn direct_save(ctx: &StatContext, token: &str, packets: &PacketMap, atime: Option<u64>) -> bool {
    let atime = atime.unwrap_or_else(epoch_secs);
    match ctx.sink.save(token, atime, packets) {
        Ok(true) => true,
        Ok(false) => {
            error!(%token, sink = ctx.sink.name(), "save sink refused batch");
            false
        }
        Err(e) => {
            error!(%token, sink = ctx.sink.name(), error = %e, "direct save failed");
            false
        }
    }
}
