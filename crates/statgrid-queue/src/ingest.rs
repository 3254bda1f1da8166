//! Ingest service — the operations the HTTP layer calls.

use serde::{Deserialize, Serialize};
use statgrid_core::{JobId, epoch_secs};
use statgrid_state::{PacketEntry, PacketMap};
use tracing::{debug, info, warn};

use crate::context::StatContext;
use crate::error::QueueResult;
use crate::scheduler::{direct_save, submit_compute, submit_save};

/// One packet as received, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPacket {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl RawPacket {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// At least one packet was valid and stored.
    Accepted {
        stored: usize,
        dropped: usize,
        /// Compute job scheduled alongside, if any.
        job_id: Option<JobId>,
    },
    /// No packet passed validation; nothing was written.
    Rejected,
}

/// Validate `packets`, merge the valid ones into the session of `token`,
/// and save them: inline when `sync`, through the `save` queue otherwise.
///
/// A failed inline save is logged and does not reject the ingest.
pub fn ingest(
    ctx: &StatContext,
    token: &str,
    packets: &[RawPacket],
    sync: bool,
) -> QueueResult<IngestOutcome> {
    let codec = ctx.codec();
    let mut valid = PacketMap::new();
    for packet in packets {
        if codec.is_valid(&packet.key, &packet.value, packet.result.as_deref()) {
            valid.insert(
                packet.key.clone(),
                PacketEntry {
                    value: packet.value.clone(),
                    result: packet.result.clone(),
                },
            );
        }
    }

    let dropped = packets.len() - valid.len();
    if valid.is_empty() {
        warn!(%token, received = packets.len(), "no valid packets, batch rejected");
        return Ok(IngestOutcome::Rejected);
    }

    let now = epoch_secs();
    ctx.store
        .merge_packets(token, &valid, now, ctx.config.packets.expire_secs)?;

    if sync {
        if !direct_save(ctx, token, &valid, Some(now)) {
            warn!(%token, "inline save failed, packets kept in session store");
        }
    } else {
        submit_save(ctx, token, &valid, Some(now))?;
    }

    debug!(%token, stored = valid.len(), dropped, sync, "packets ingested");
    Ok(IngestOutcome::Accepted {
        stored: valid.len(),
        dropped,
        job_id: None,
    })
}

/// [`ingest`], then schedule `stat` for the session.
///
/// An unknown stat fails before anything is written. Nothing is scheduled
/// for a rejected batch.
pub fn ingest_and_schedule(
    ctx: &StatContext,
    token: &str,
    stat: &str,
    packets: &[RawPacket],
    sync: bool,
) -> QueueResult<IngestOutcome> {
    ctx.registry.resolve(stat)?;

    match ingest(ctx, token, packets, sync)? {
        IngestOutcome::Accepted {
            stored, dropped, ..
        } => {
            let job_id = submit_compute(ctx, stat, token)?;
            Ok(IngestOutcome::Accepted {
                stored,
                dropped,
                job_id: Some(job_id),
            })
        }
        IngestOutcome::Rejected => Ok(IngestOutcome::Rejected),
    }
}

/// Schedule `stat` for `token` without ingesting anything.
pub fn schedule(ctx: &StatContext, stat: &str, token: &str) -> QueueResult<JobId> {
    let job_id = submit_compute(ctx, stat, token)?;
    info!(%stat, %token, %job_id, "stat scheduled");
    Ok(job_id)
}
