//! Janitor — periodic purge of expired packet sets and job records.
//!
//! Expired data is already invisible to readers; the janitor only reclaims
//! the space.

use std::time::Duration;

use statgrid_core::epoch_secs;
use statgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::StatContext;
use crate::error::QueueResult;

/// Counts removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub packets: usize,
    pub jobs: usize,
}

pub struct Janitor {
    store: StateStore,
    interval: Duration,
}

impl Janitor {
    pub fn new(ctx: &StatContext) -> Self {
        Self {
            store: ctx.store.clone(),
            interval: ctx.config.jobs.janitor_interval(),
        }
    }

    pub fn sweep(&self, now: u64) -> QueueResult<SweepReport> {
        let report = SweepReport {
            packets: self.store.purge_expired_packets(now)?,
            jobs: self.store.purge_expired_jobs(now)?,
        };
        if report != SweepReport::default() {
            debug!(packets = report.packets, jobs = report.jobs, "janitor sweep");
        }
        Ok(report)
    }

    /// Sweep every interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "janitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep(epoch_secs()) {
                        warn!(error = %e, "janitor sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("janitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{packet_map, test_context};
    use statgrid_core::QueueName;
    use statgrid_state::{JobKind, JobRecord};

    #[test]
    fn sweep_removes_only_expired() {
        let ctx = test_context();
        let packets = packet_map(&[("1:2:3:4:5:6:7", "1:2:3")]);
        ctx.store.merge_packets("old", &packets, 1000, 100).unwrap();
        ctx.store.merge_packets("new", &packets, 5000, 100).unwrap();

        let mut expiring = JobRecord::new(
            "save:1".to_string(),
            QueueName::Save,
            JobKind::Save {
                token: "old".to_string(),
                atime: 1000,
                packets: packets.clone(),
            },
            30,
            1000,
        );
        expiring.expires_at = Some(1030);
        ctx.store.put_job(&expiring).unwrap();

        let janitor = Janitor::new(&ctx);
        let report = janitor.sweep(2000).unwrap();
        assert_eq!(report, SweepReport { packets: 1, jobs: 1 });
        assert_eq!(janitor.sweep(2000).unwrap(), SweepReport::default());
        assert_eq!(ctx.store.get_packets("new", 2000).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let ctx = test_context();
        let janitor = Janitor::new(&ctx);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { janitor.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
