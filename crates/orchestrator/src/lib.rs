//! Auto-scan pipeline: runs the fixed step list for one scope target, feeding each
//! consolidation checkpoint's output back into the discovery steps after it.
//!
//! Pause and cancel are cooperative. They are observed between steps only; an in-flight
//! step always runs to its terminal status first.

mod error;
mod run;
mod runner;

pub use error::{OrchestratorError, Result};
pub use runner::{LiveProbe, StepContext, StepRunner};

use consolidation::ConsolidationEngine;
use reconflow_core::{AutoScanConfig, AutoScanSession, IDLE};
use results_sqlite::{CancelOutcome, Store, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub const ORPHANED_SESSION_MESSAGE: &str = "orchestrator exited before the session finished";

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// How often a paused run re-reads its target's state.
    pub pause_poll: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions { pause_poll: Duration::from_millis(2000) }
    }
}

/// What a start-up sweep cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    pub failed_sessions: Vec<Uuid>,
    pub reset_targets: Vec<Uuid>,
}

struct Inner {
    engine: ConsolidationEngine,
    runner: Arc<dyn StepRunner>,
    probe: Arc<dyn LiveProbe>,
    options: OrchestratorOptions,
    runs: Mutex<HashMap<Uuid, CancellationToken>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("options", &self.inner.options).finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        engine: ConsolidationEngine,
        runner: Arc<dyn StepRunner>,
        probe: Arc<dyn LiveProbe>,
        options: OrchestratorOptions,
    ) -> Self {
        Orchestrator { inner: Arc::new(Inner { engine, runner, probe, options, runs: Mutex::new(HashMap::new()) }) }
    }

    pub fn store(&self) -> &Store {
        self.inner.engine.store()
    }

    pub fn engine(&self) -> &ConsolidationEngine {
        &self.inner.engine
    }

    /// Opens a `pending` session. `config` defaults to the stored AutoScanConfig and is
    /// frozen into the session either way.
    pub fn create_session(&self, scope_target_id: Uuid, config: Option<AutoScanConfig>) -> Result<AutoScanSession> {
        let session = self.store().with(|db| {
            db.scope_target(scope_target_id)?;
            if db.active_session_count(scope_target_id)? > 0 {
                return Ok(None);
            }
            let config = match config {
                Some(c) => c,
                None => db.auto_scan_config()?,
            };
            db.create_session(scope_target_id, &config).map(Some)
        })?;
        session.ok_or(OrchestratorError::Busy(scope_target_id))
    }

    /// Creates a session and runs it on the tokio runtime. The handle resolves to the
    /// finished session.
    pub fn start(
        &self,
        scope_target_id: Uuid,
        config: Option<AutoScanConfig>,
    ) -> Result<(AutoScanSession, JoinHandle<Result<AutoScanSession>>)> {
        let session = self.create_session(scope_target_id, config)?;
        let token = self.register(session.id);
        let this = self.clone();
        let session_id = session.id;
        let handle = tokio::spawn(async move { this.run(session_id, token).await });
        Ok((session, handle))
    }

    /// Runs an existing session in the caller's task.
    pub async fn run_session(&self, session_id: Uuid) -> Result<AutoScanSession> {
        let token = self.register(session_id);
        self.run(session_id, token).await
    }

    fn register(&self, session_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut runs) = self.inner.runs.lock() {
            runs.insert(session_id, token.clone());
        }
        token
    }

    pub(crate) fn unregister(&self, session_id: Uuid) {
        if let Ok(mut runs) = self.inner.runs.lock() {
            runs.remove(&session_id);
        }
    }

    pub fn is_running(&self, session_id: Uuid) -> bool {
        self.inner.runs.lock().map(|runs| runs.contains_key(&session_id)).unwrap_or(false)
    }

    /// Operator cancel: updates the registry and wakes the session's run if it is in this
    /// process. A completed session is reported as such and left alone.
    pub fn cancel(&self, session_id: Uuid, mark_completed: bool) -> Result<CancelOutcome> {
        let outcome = self.store().with(|db| db.cancel_session(session_id, mark_completed))?;
        if !outcome.already_completed {
            let token = self.inner.runs.lock().map_err(|_| StoreError::Poisoned)?.get(&session_id).cloned();
            if let Some(token) = token {
                token.cancel();
            }
        }
        Ok(outcome)
    }

    /// Start-up sweep: sessions a dead process left active are failed, and target states
    /// stuck at a step with no active session go back to IDLE.
    pub fn recover_stale_runs(&self) -> Result<Recovery> {
        let recovery = self.store().with(|db| {
            let failed_sessions = db.fail_orphaned_sessions(ORPHANED_SESSION_MESSAGE)?;
            let mut reset_targets = Vec::new();
            for state in db.stale_states()? {
                warn!(scope_target_id = %state.scope_target_id, step = %state.current_step, "resetting stale auto-scan state to {IDLE}");
                db.reset_auto_scan_state(state.scope_target_id)?;
                reset_targets.push(state.scope_target_id);
            }
            Ok(Recovery { failed_sessions, reset_targets })
        })?;
        if !recovery.failed_sessions.is_empty() || !recovery.reset_targets.is_empty() {
            info!(
                failed_sessions = recovery.failed_sessions.len(),
                reset_targets = recovery.reset_targets.len(),
                "recovered stale auto-scan runs"
            );
        }
        Ok(recovery)
    }
}
