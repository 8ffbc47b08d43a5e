use reconflow_core::{AutoScanSession, ScanStatus};
use serde::{Deserialize, Serialize};

/// Terminal write for a tool scan row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCompletion {
    pub status: ScanStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub execution_time: Option<String>,
}

impl ScanCompletion {
    pub fn success(result: impl Into<String>) -> Self {
        ScanCompletion {
            status: ScanStatus::Success,
            result: Some(result.into()),
            error: None,
            stdout: None,
            stderr: None,
            execution_time: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ScanCompletion {
            status: ScanStatus::Failed,
            result: None,
            error: Some(error.into()),
            stdout: None,
            stderr: None,
            execution_time: None,
        }
    }
}

/// Result of a cancel request. `already_completed` means nothing was changed.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub session: AutoScanSession,
    pub already_completed: bool,
}
