use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of one stage execution within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// Completed with the processed fraction at or above the success
    /// threshold; `last_success_at` advances.
    Success,
    /// Completed below the success threshold; eligible for retry next cycle.
    Partial,
    /// Dependency or single-flight check failed before execution started;
    /// zero writes performed.
    Blocked,
    /// Unrecoverable error; timestamp does not advance.
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "SUCCESS",
            StageStatus::Partial => "PARTIAL",
            StageStatus::Blocked => "BLOCKED",
            StageStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "SUCCESS" => Ok(StageStatus::Success),
            "PARTIAL" => Ok(StageStatus::Partial),
            "BLOCKED" => Ok(StageStatus::Blocked),
            "FAILED" => Ok(StageStatus::Failed),
            other => Err(format!("Unknown stage status: {}", other)),
        }
    }
}

/// Per-stage freshness and single-flight bookkeeping, keyed by stage name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub stage: String,
    pub depends_on: Vec<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_status: Option<StageStatus>,
    /// Runner id currently holding the single-flight lock, if any.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_round_trip() {
        for status in [
            StageStatus::Success,
            StageStatus::Partial,
            StageStatus::Blocked,
            StageStatus::Failed,
        ] {
            assert_eq!(StageStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_stage_status_parse_unknown() {
        assert!(StageStatus::parse("RUNNING_AMOK").is_err());
    }
}
