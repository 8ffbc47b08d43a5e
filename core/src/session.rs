use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AutoScanConfig, ParseError, Step, IDLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed)
    }

    fn finality(&self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::Running => 1,
            SessionStatus::Failed | SessionStatus::Cancelled => 2,
            SessionStatus::Completed => 3,
        }
    }

    /// Status only ever moves towards a more final state; `completed` is never left.
    pub fn can_advance_to(&self, next: SessionStatus) -> bool {
        next.finality() > self.finality()
    }
}

impl FromStr for SessionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(ParseError::new("session status", s)),
        }
    }
}

/// What a target is doing right now, independent of any particular session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScanState {
    pub scope_target_id: Uuid,
    pub current_step: String,
    pub is_paused: bool,
    pub is_cancelled: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub updated_at: Option<OffsetDateTime>,
}

impl AutoScanState {
    pub fn idle(scope_target_id: Uuid) -> Self {
        AutoScanState {
            scope_target_id,
            current_step: IDLE.to_string(),
            is_paused: false,
            is_cancelled: false,
            updated_at: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_step == IDLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Completed,
    Skipped,
    Failed,
}

/// One entry of a session's `steps_run` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
}

impl StepRecord {
    pub fn skipped(step: Step) -> Self {
        let now = OffsetDateTime::now_utc();
        StepRecord { step, outcome: StepOutcome::Skipped, error: None, started_at: now, ended_at: now }
    }
}

/// One pipeline run for a scope target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScanSession {
    pub id: Uuid,
    pub scope_target_id: Uuid,
    pub config_snapshot: AutoScanConfig,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub ended_at: Option<OffsetDateTime>,
    pub steps_run: Vec<StepRecord>,
    pub error_message: Option<String>,
    pub final_consolidated_subdomains: Option<u64>,
    pub final_live_web_servers: Option<u64>,
}

/// Counts recorded on a session when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalCounts {
    pub consolidated_subdomains: u64,
    pub live_web_servers: u64,
}
