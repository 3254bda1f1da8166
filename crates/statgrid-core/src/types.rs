//! Shared identifiers used across statgrid crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Job identifier. Collector and compute ids are derived, save ids are random.
pub type JobId = String;

/// Opaque caller-supplied session token.
pub type SessionToken = String;

/// Prefix shared by collector and compute job ids.
pub const STAT_ID_PREFIX: &str = "stat";

/// Prefix for fire-and-forget save job ids.
pub const SAVE_ID_PREFIX: &str = "save";

/// Identity of the collector job for `stat`.
pub fn collector_job_id(stat: &str) -> JobId {
    format!("{STAT_ID_PREFIX}:{stat}")
}

/// Identity of the compute job for `(stat, token)`.
pub fn compute_job_id(stat: &str, token: &str) -> JobId {
    format!("{STAT_ID_PREFIX}:{stat}:{token}")
}

/// Named durable queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Collector and compute jobs.
    Calc,
    /// Durable packet saves.
    Save,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Calc, QueueName::Save];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Calc => "calc",
            QueueName::Save => "save",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        // Should be after 2024-01-01.
        assert!(epoch_secs() > 1_704_067_200);
    }

    #[test]
    fn job_ids_are_deterministic() {
        assert_eq!(collector_job_id("avg_resp_time"), "stat:avg_resp_time");
        assert_eq!(
            compute_job_id("avg_resp_time", "test_123"),
            "stat:avg_resp_time:test_123"
        );
        assert_eq!(
            compute_job_id("avg_resp_time", "t"),
            compute_job_id("avg_resp_time", "t")
        );
    }

    #[test]
    fn queue_names() {
        assert_eq!(QueueName::Calc.to_string(), "calc");
        assert_eq!(QueueName::Save.as_str(), "save");
        let json = serde_json::to_string(&QueueName::Save).unwrap();
        assert_eq!(json, "\"save\"");
    }
}
