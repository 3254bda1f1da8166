//! Worker pool — executes queued jobs.
//!
//! A worker pops a job id, claims the record by moving it Queued → Running
//! in one store transaction, runs its body under the job's timeout, and
//! records the outcome. Ids whose record is missing, expired, or no longer
//! Queued are skipped, so duplicate queue entries are harmless.
//!
//! On completion the record's dependents are released (Deferred → Queued)
//! or, if the job failed, failed with `dependency failed`. A job flagged
//! `follow_up` while running is queued again instead, keeping its
//! dependents waiting for the next run.
//!
//! If the outcome cannot be recorded, the job is failed in a second
//! transaction. Should that fail too, the record stays Running until the
//! next startup [`WorkerPool::recover`] abandons it.

use std::time::Duration;

use serde_json::Value;
use statgrid_core::{JobId, QueueName, epoch_secs};
use statgrid_state::{JobKind, JobRecord, JobState, JobsTxn, decode_entries};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::StatContext;
use crate::error::{QueueError, QueueResult};

/// Error recorded on dependents of a failed job.
pub const DEPENDENCY_FAILED: &str = "dependency failed";

/// Error recorded on jobs left Running by a previous process.
pub const ABANDONED: &str = "abandoned";

/// What startup recovery did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub abandoned: usize,
}

/// Executes jobs from the `calc` and `save` queues.
#[derive(Clone)]
pub struct WorkerPool {
    ctx: StatContext,
}

impl WorkerPool {
    pub fn new(ctx: StatContext) -> Self {
        Self { ctx }
    }

    /// Re-push Queued jobs and fail jobs a previous process left Running.
    pub fn recover(&self) -> QueueResult<RecoveryReport> {
        let now = epoch_secs();
        let failure_ttl = self.ctx.config.jobs.failure_ttl_secs;
        let mut report = RecoveryReport::default();

        for record in self.ctx.store.list_jobs()? {
            if record.is_expired(now) {
                continue;
            }
            match record.state {
                JobState::Queued => {
                    self.ctx.queues.push(record.queue, record.id.clone());
                    report.requeued += 1;
                }
                JobState::Running => {
                    self.ctx.store.with_jobs(|jobs| {
                        fail_in_txn(jobs, &record.id, ABANDONED, now, failure_ttl)
                    })?;
                    warn!(job_id = %record.id, "running job abandoned by previous process");
                    report.abandoned += 1;
                }
                _ => {}
            }
        }

        info!(
            requeued = report.requeued,
            abandoned = report.abandoned,
            "job recovery complete"
        );
        Ok(report)
    }

    /// Spawn `jobs.calc_workers` + `jobs.save_workers` worker tasks.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for queue in QueueName::ALL {
            let count = match queue {
                QueueName::Calc => self.ctx.config.jobs.calc_workers,
                QueueName::Save => self.ctx.config.jobs.save_workers,
            };
            for index in 0..count {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move {
                    pool.worker_loop(queue, index, shutdown).await;
                }));
            }
            info!(%queue, workers = count, "workers started");
        }
        handles
    }

    async fn worker_loop(&self, queue: QueueName, index: usize, mut shutdown: watch::Receiver<bool>) {
        let jobs = self.ctx.queues.get(queue).clone();
        debug!(%queue, index, "worker loop starting");

        loop {
            tokio::select! {
                next = jobs.pop() => {
                    let Some(id) = next else { break };
                    if let Err(e) = self.execute(&id).await {
                        error!(%queue, job_id = %id, error = %e, "job execution failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(%queue, index, "worker loop shutting down");
                    break;
                }
            }
        }
    }

    /// Execute everything that is ready, including jobs released along the
    /// way, then return the number of jobs run.
    pub async fn run_burst(&self) -> QueueResult<usize> {
        let mut executed = 0;
        loop {
            let mut progressed = false;
            for queue in QueueName::ALL {
                while let Some(id) = self.ctx.queues.get(queue).try_pop() {
                    progressed = true;
                    if self.execute(&id).await? {
                        executed += 1;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        debug!(executed, "burst complete");
        Ok(executed)
    }

    /// Claim, run, and complete one job. Returns false when the id was stale.
    pub async fn execute(&self, id: &str) -> QueueResult<bool> {
        let Some(record) = self.claim(id)? else {
            debug!(job_id = %id, "stale queue entry skipped");
            return Ok(false);
        };

        debug!(job_id = %id, queue = %record.queue, "job started");
        let limit = Duration::from_secs(record.timeout_secs);
        let outcome = match tokio::time::timeout(limit, self.run_body(&record)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("timed out after {}s", record.timeout_secs)),
        };

        if let Err(e) = self.complete(id, outcome) {
            self.fail_stuck(id, &e);
            return Err(e);
        }
        Ok(true)
    }

    /// Fail a claimed job whose completion could not be written.
    fn fail_stuck(&self, id: &str, cause: &QueueError) {
        let now = epoch_secs();
        let failure_ttl = self.ctx.config.jobs.failure_ttl_secs;
        let reason = format!("completion failed: {cause}");
        match self
            .ctx
            .store
            .with_jobs(|jobs| fail_in_txn(jobs, id, &reason, now, failure_ttl))
        {
            Ok(()) => warn!(job_id = %id, error = %cause, "completion failed, job marked failed"),
            Err(e) => error!(
                job_id = %id,
                error = %e,
                "could not fail job, left running until recovery"
            ),
        }
    }

    fn claim(&self, id: &str) -> QueueResult<Option<JobRecord>> {
        let now = epoch_secs();
        self.ctx.store.with_jobs(|jobs| -> QueueResult<Option<JobRecord>> {
            let Some(mut record) = jobs.get(id)? else {
                return Ok(None);
            };
            if record.is_expired(now) || record.state != JobState::Queued {
                return Ok(None);
            }
            record.state = JobState::Running;
            record.started_at = Some(now);
            record.error = None;
            jobs.put(&record)?;
            Ok(Some(record))
        })
    }

    async fn run_body(&self, record: &JobRecord) -> anyhow::Result<Value> {
        match &record.kind {
            JobKind::Collect { stat, tokens } => {
                let members = self.ctx.store.add_to_collector(stat, tokens)?;
                debug!(%stat, members = members.len(), "collector updated");
                Ok(Value::from(members))
            }
            JobKind::Compute { stat, token } => {
                let stat = self.ctx.registry.resolve(stat)?;
                let entries = self.ctx.store.get_packets(token, epoch_secs())?;
                let packets = decode_entries(&self.ctx.codec(), &entries);
                tokio::task::spawn_blocking(move || stat.compute(&packets)).await?
            }
            JobKind::Save {
                token,
                atime,
                packets,
            } => {
                let sink = self.ctx.sink.clone();
                let (token, atime, packets) = (token.clone(), *atime, packets.clone());
                let saved =
                    tokio::task::spawn_blocking(move || sink.save(&token, atime, &packets))
                        .await??;
                if !saved {
                    anyhow::bail!("save sink refused batch");
                }
                Ok(Value::Bool(true))
            }
        }
    }

    fn complete(&self, id: &str, outcome: anyhow::Result<Value>) -> QueueResult<()> {
        let now = epoch_secs();
        let failure_ttl = self.ctx.config.jobs.failure_ttl_secs;

        let to_push = self.ctx.store.with_jobs(|jobs| -> QueueResult<Vec<(QueueName, JobId)>> {
            let Some(mut record) = jobs.get(id)? else {
                return Ok(Vec::new());
            };
            record.ended_at = Some(now);

            if record.follow_up {
                record.follow_up = false;
                record.state = JobState::Queued;
                record.enqueued_at = now;
                match outcome {
                    Ok(value) => record.result = Some(value),
                    Err(e) => record.error = Some(e.to_string()),
                }
                jobs.put(&record)?;
                info!(job_id = %id, "job requeued for follow-up run");
                return Ok(vec![(record.queue, record.id)]);
            }

            match outcome {
                Ok(value) => {
                    record.state = JobState::Finished;
                    record.result = Some(value);
                    record.error = None;
                    record.expires_at = record.result_ttl_secs.map(|ttl| now.saturating_add(ttl));
                    let dependents = std::mem::take(&mut record.dependents);
                    jobs.put(&record)?;
                    info!(job_id = %id, dependents = dependents.len(), "job finished");

                    let mut released = Vec::new();
                    for dep_id in dependents {
                        let Some(mut dep) = jobs.get(&dep_id)? else {
                            continue;
                        };
                        if dep.state == JobState::Deferred {
                            dep.state = JobState::Queued;
                            dep.enqueued_at = now;
                            jobs.put(&dep)?;
                            released.push((dep.queue, dep.id));
                        }
                    }
                    Ok(released)
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "job failed");
                    fail_in_txn(jobs, id, &e.to_string(), now, failure_ttl)?;
                    Ok(Vec::new())
                }
            }
        })?;

        self.push_all(to_push);
        Ok(())
    }

    fn push_all(&self, ids: Vec<(QueueName, JobId)>) {
        for (queue, id) in ids {
            self.ctx.queues.push(queue, id);
        }
    }
}

/// Mark `id` Failed and fail its Deferred dependents.
fn fail_in_txn(
    jobs: &mut JobsTxn<'_>,
    id: &str,
    reason: &str,
    now: u64,
    failure_ttl: u64,
) -> QueueResult<()> {
    let Some(mut record) = jobs.get(id)? else {
        return Ok(());
    };
    let expires_at = Some(now.saturating_add(failure_ttl));
    record.state = JobState::Failed;
    record.error = Some(reason.to_string());
    record.ended_at = Some(now);
    record.expires_at = expires_at;
    let dependents = std::mem::take(&mut record.dependents);
    jobs.put(&record)?;

    for dep_id in dependents {
        let Some(mut dep) = jobs.get(&dep_id)? else {
            continue;
        };
        if dep.state == JobState::Deferred {
            dep.state = JobState::Failed;
            dep.error = Some(DEPENDENCY_FAILED.to_string());
            dep.ended_at = Some(now);
            dep.expires_at = expires_at;
            jobs.put(&dep)?;
            debug!(job_id = %dep_id, dependency = %id, "dependent failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Computable, StatRegistry};
    use crate::scheduler::{submit_compute, submit_save};
    use crate::test_support::{context_with, packet_map, test_context};
    use statgrid_core::{Packet, StatgridConfig};
    use std::sync::Arc;

    struct Failing;

    impl Computable for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn compute(&self, _: &[Packet]) -> anyhow::Result<Value> {
            anyhow::bail!("reducer exploded")
        }
    }

    struct Slow;

    impl Computable for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn compute(&self, _: &[Packet]) -> anyhow::Result<Value> {
            std::thread::sleep(Duration::from_millis(2500));
            Ok(Value::from(1))
        }
    }

    fn store_packets(ctx: &StatContext, token: &str) {
        let packets = packet_map(&[("1:2:3:4:5:6:7", "1:2.0:1"), ("1:2:3:4:5:6:8", "1:4.0:0")]);
        ctx.store
            .merge_packets(token, &packets, epoch_secs(), 1800)
            .unwrap();
    }

    #[tokio::test]
    async fn burst_runs_collector_then_compute() {
        let ctx = test_context();
        store_packets(&ctx, "t1");
        let id = submit_compute(&ctx, "avg_resp_time", "t1").unwrap();

        let pool = WorkerPool::new(ctx.clone());
        assert_eq!(pool.run_burst().await.unwrap(), 2);

        let collector = ctx.store.get_job("stat:avg_resp_time").unwrap().unwrap();
        assert_eq!(collector.state, JobState::Finished);
        assert_eq!(collector.result, Some(serde_json::json!(["t1"])));
        assert!(collector.dependents.is_empty());
        assert!(collector.expires_at.is_none());

        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Finished);
        assert_eq!(compute.result, Some(serde_json::json!(3.0)));
        assert!(compute.started_at.is_some());
        assert!(compute.ended_at.is_some());
    }

    #[tokio::test]
    async fn deferred_compute_is_not_runnable() {
        let ctx = test_context();
        let id = submit_compute(&ctx, "avg_resp_time", "t1").unwrap();
        let pool = WorkerPool::new(ctx.clone());

        // A stray queue entry for the compute job is ignored while Deferred.
        assert!(!pool.execute(&id).await.unwrap());
        assert_eq!(
            ctx.store.get_job(&id).unwrap().unwrap().state,
            JobState::Deferred
        );
    }

    #[tokio::test]
    async fn duplicate_queue_entries_run_once() {
        let ctx = test_context();
        submit_compute(&ctx, "avg_resp_time", "t1").unwrap();
        ctx.queues
            .push(QueueName::Calc, "stat:avg_resp_time".to_string());

        let pool = WorkerPool::new(ctx.clone());
        assert_eq!(pool.run_burst().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn collector_aggregates_tokens_across_runs() {
        let ctx = test_context();
        let pool = WorkerPool::new(ctx.clone());
        submit_compute(&ctx, "avg_resp_time", "t1").unwrap();
        pool.run_burst().await.unwrap();
        submit_compute(&ctx, "avg_resp_time", "t2").unwrap();
        pool.run_burst().await.unwrap();

        let collector = ctx.store.get_job("stat:avg_resp_time").unwrap().unwrap();
        assert_eq!(collector.result, Some(serde_json::json!(["t1", "t2"])));
    }

    #[tokio::test]
    async fn failure_propagates_to_dependents() {
        let mut registry = StatRegistry::with_builtins();
        registry.register(Arc::new(Failing));
        let ctx = context_with(StatgridConfig::default(), registry);
        let id = submit_compute(&ctx, "failing", "t1").unwrap();

        // Fail the collector directly to exercise dependent failure.
        let pool = WorkerPool::new(ctx.clone());
        let _ = ctx.queues.get(QueueName::Calc).try_pop();
        let mut collector = ctx.store.get_job("stat:failing").unwrap().unwrap();
        collector.state = JobState::Running;
        ctx.store.put_job(&collector).unwrap();
        pool.complete("stat:failing", Err(anyhow::anyhow!("boom")))
            .unwrap();

        let collector = ctx.store.get_job("stat:failing").unwrap().unwrap();
        assert_eq!(collector.state, JobState::Failed);
        assert_eq!(collector.error.as_deref(), Some("boom"));
        assert!(collector.expires_at.is_some());

        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Failed);
        assert_eq!(compute.error.as_deref(), Some(DEPENDENCY_FAILED));
    }

    #[test]
    fn unrecorded_completion_fails_claimed_job() {
        let ctx = test_context();
        let id = submit_compute(&ctx, "avg_resp_time", "t1").unwrap();
        let pool = WorkerPool::new(ctx.clone());
        let collector_id = ctx.queues.get(QueueName::Calc).try_pop().unwrap();
        let claimed = pool.claim(&collector_id).unwrap().unwrap();
        assert_eq!(claimed.state, JobState::Running);

        pool.fail_stuck(&collector_id, &QueueError::UnknownStat("gone".to_string()));

        let collector = ctx.store.get_job(&collector_id).unwrap().unwrap();
        assert_eq!(collector.state, JobState::Failed);
        assert!(collector.error.unwrap().starts_with("completion failed"));
        assert!(collector.expires_at.is_some());

        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Failed);
        assert_eq!(compute.error.as_deref(), Some(DEPENDENCY_FAILED));
    }

    #[tokio::test]
    async fn reducer_error_fails_job() {
        let mut registry = StatRegistry::with_builtins();
        registry.register(Arc::new(Failing));
        let ctx = context_with(StatgridConfig::default(), registry);
        let id = submit_compute(&ctx, "failing", "t1").unwrap();

        let pool = WorkerPool::new(ctx.clone());
        assert_eq!(pool.run_burst().await.unwrap(), 2);

        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Failed);
        assert_eq!(compute.error.as_deref(), Some("reducer exploded"));
        assert!(compute.finished_result().is_none());
    }

    #[tokio::test]
    async fn timeout_fails_job() {
        let mut registry = StatRegistry::with_builtins();
        registry.register(Arc::new(Slow));
        let mut config = StatgridConfig::default();
        config.jobs.timeout_secs = 1;
        let ctx = context_with(config, registry);
        let id = submit_compute(&ctx, "slow", "t1").unwrap();

        let pool = WorkerPool::new(ctx.clone());
        pool.run_burst().await.unwrap();

        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Failed);
        assert!(compute.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn follow_up_reruns_after_current_run() {
        let ctx = test_context();
        store_packets(&ctx, "t1");
        let id = submit_compute(&ctx, "avg_resp_time", "t1").unwrap();
        let pool = WorkerPool::new(ctx.clone());
        pool.run_burst().await.unwrap();

        // Simulate a resubmission landing while the compute job runs.
        let mut compute = ctx.store.get_job(&id).unwrap().unwrap();
        compute.state = JobState::Running;
        compute.follow_up = true;
        ctx.store.put_job(&compute).unwrap();
        pool.complete(&id, Ok(serde_json::json!(9.0))).unwrap();

        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Queued);
        assert!(!compute.follow_up);

        assert_eq!(pool.run_burst().await.unwrap(), 1);
        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.state, JobState::Finished);
        assert_eq!(compute.result, Some(serde_json::json!(3.0)));
    }

    #[tokio::test]
    async fn save_job_uses_sink_and_expires() {
        let ctx = test_context();
        let packets = packet_map(&[("1:2:3:4:5:6:7", "1:2:3")]);
        let id = submit_save(&ctx, "t1", &packets, Some(10)).unwrap();

        let pool = WorkerPool::new(ctx.clone());
        assert_eq!(pool.run_burst().await.unwrap(), 1);

        let record = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(record.state, JobState::Finished);
        assert!(record.expires_at.is_some());
        assert_eq!(ctx.store.list_archive("t1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_requeues_and_abandons() {
        let ctx = test_context();
        let id = submit_compute(&ctx, "avg_resp_time", "t1").unwrap();
        submit_compute(&ctx, "avg_resp_time", "t2").unwrap();
        let mut collector = ctx.store.get_job("stat:avg_resp_time").unwrap().unwrap();
        collector.state = JobState::Running;
        ctx.store.put_job(&collector).unwrap();
        let packets = packet_map(&[("1:2:3:4:5:6:7", "1:2:3")]);
        submit_save(&ctx, "t1", &packets, None).unwrap();

        // Same store, fresh queues, as after a restart.
        let restarted = StatContext::new(
            ctx.store.clone(),
            (*ctx.config).clone(),
            StatRegistry::with_builtins(),
        );
        let pool = WorkerPool::new(restarted);
        let report = pool.recover().unwrap();
        assert_eq!(report, RecoveryReport { requeued: 1, abandoned: 1 });

        let collector = ctx.store.get_job("stat:avg_resp_time").unwrap().unwrap();
        assert_eq!(collector.state, JobState::Failed);
        assert_eq!(collector.error.as_deref(), Some(ABANDONED));
        let compute = ctx.store.get_job(&id).unwrap().unwrap();
        assert_eq!(compute.error.as_deref(), Some(DEPENDENCY_FAILED));

        assert_eq!(pool.run_burst().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn started_workers_drain_queues() {
        let ctx = test_context();
        store_packets(&ctx, "t1");
        let id = submit_compute(&ctx, "avg_resp_time", "t1").unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::new(ctx.clone());
        let handles = pool.start(shutdown_rx);
        assert_eq!(handles.len(), 3);

        let mut finished = false;
        for _ in 0..100 {
            let record = ctx.store.get_job(&id).unwrap().unwrap();
            if record.state == JobState::Finished {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(finished);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
