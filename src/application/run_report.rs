use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::entities::pipeline_run::StageStatus;

/// One symbol left unprocessed in a run, with the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: String,
}

impl SkippedSymbol {
    pub fn new(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        SkippedSymbol {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

/// Structured result of one stage invocation, returned to the trigger
/// surface and serialized to stdout by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stage: String,
    pub status: StageStatus,
    pub symbols_processed: usize,
    pub symbols_skipped: Vec<SkippedSymbol>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunReport {
    /// Report for a stage that never started executing: zero writes, zero
    /// symbols touched.
    pub fn blocked(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        RunReport {
            stage: stage.into(),
            status: StageStatus::Blocked,
            symbols_processed: 0,
            symbols_skipped: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            message: Some(reason.into()),
        }
    }

    /// Process exit code for the trigger surface: only FAILED is non-zero.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            StageStatus::Failed => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_report_shape() {
        let report = RunReport::blocked("composite_scoring", "dependency stale");
        assert_eq!(report.status, StageStatus::Blocked);
        assert_eq!(report.symbols_processed, 0);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_exit_codes() {
        let mut report = RunReport::blocked("x", "y");
        for (status, code) in [
            (StageStatus::Success, 0),
            (StageStatus::Partial, 0),
            (StageStatus::Blocked, 0),
            (StageStatus::Failed, 1),
        ] {
            report.status = status;
            assert_eq!(report.exit_code(), code);
        }
    }

    #[test]
    fn test_report_serializes() {
        let report = RunReport::blocked("universe_sync", "lock held");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "BLOCKED");
        assert_eq!(json["stage"], "universe_sync");
    }
}
