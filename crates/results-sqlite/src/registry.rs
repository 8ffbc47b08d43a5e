//! Session/state registry: the per-target `AutoScanState`, the `AutoScanConfig`
//! singleton and the `AutoScanSession` log of pipeline runs.

use crate::models::CancelOutcome;
use crate::rows::{json_at, now_ms, opt_time_at, parsed_at, time_at, uuid_at};
use crate::{Db, Result, StoreError};
use reconflow_core::{
    AutoScanConfig, AutoScanSession, AutoScanState, FinalCounts, SessionStatus, StepRecord, IDLE,
};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, scope_target_id, config_snapshot, status, started_ms, ended_ms, steps_run, error_message, final_consolidated_subdomains, final_live_web_servers";

fn session_from_row(r: &Row) -> rusqlite::Result<AutoScanSession> {
    Ok(AutoScanSession {
        id: uuid_at(r, 0)?,
        scope_target_id: uuid_at(r, 1)?,
        config_snapshot: json_at(r, 2)?,
        status: parsed_at(r, 3)?,
        started_at: time_at(r, 4)?,
        ended_at: opt_time_at(r, 5)?,
        steps_run: json_at(r, 6)?,
        error_message: r.get(7)?,
        final_consolidated_subdomains: r.get::<_, Option<i64>>(8)?.map(|n| n.max(0) as u64),
        final_live_web_servers: r.get::<_, Option<i64>>(9)?.map(|n| n.max(0) as u64),
    })
}

fn state_from_row(r: &Row) -> rusqlite::Result<AutoScanState> {
    Ok(AutoScanState {
        scope_target_id: uuid_at(r, 0)?,
        current_step: r.get(1)?,
        is_paused: r.get(2)?,
        is_cancelled: r.get(3)?,
        updated_at: opt_time_at(r, 4)?,
    })
}

impl Db {
    /// Current state for a target, or the idle default when no row exists yet.
    pub fn auto_scan_state(&self, scope_target_id: Uuid) -> Result<AutoScanState> {
        let state = self
            .conn
            .query_row(
                "SELECT scope_target_id, current_step, is_paused, is_cancelled, updated_ms FROM auto_scan_state WHERE scope_target_id=?",
                [scope_target_id.to_string()],
                state_from_row,
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| AutoScanState::idle(scope_target_id)))
    }

    pub fn put_auto_scan_state(&self, state: &AutoScanState) -> Result<AutoScanState> {
        if state.current_step.trim().is_empty() {
            return Err(StoreError::InvalidInput("current_step is required".into()));
        }
        self.require_scope_target(state.scope_target_id)?;
        self.conn.execute(
            "INSERT INTO auto_scan_state(scope_target_id, current_step, is_paused, is_cancelled, updated_ms) VALUES (?,?,?,?,?)
             ON CONFLICT(scope_target_id) DO UPDATE SET current_step=excluded.current_step, is_paused=excluded.is_paused, is_cancelled=excluded.is_cancelled, updated_ms=excluded.updated_ms",
            params![state.scope_target_id.to_string(), state.current_step.trim(), state.is_paused, state.is_cancelled, now_ms()],
        )?;
        self.auto_scan_state(state.scope_target_id)
    }

    /// Moves `current_step` without touching the pause/cancel flags.
    pub fn set_current_step(&self, scope_target_id: Uuid, step: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO auto_scan_state(scope_target_id, current_step, updated_ms) VALUES (?,?,?)
             ON CONFLICT(scope_target_id) DO UPDATE SET current_step=excluded.current_step, updated_ms=excluded.updated_ms",
            params![scope_target_id.to_string(), step, now_ms()],
        )?;
        Ok(())
    }

    pub fn set_paused(&self, scope_target_id: Uuid, paused: bool) -> Result<()> {
        self.require_scope_target(scope_target_id)?;
        self.conn.execute(
            "INSERT INTO auto_scan_state(scope_target_id, current_step, is_paused, updated_ms) VALUES (?,?,?,?)
             ON CONFLICT(scope_target_id) DO UPDATE SET is_paused=excluded.is_paused, updated_ms=excluded.updated_ms",
            params![scope_target_id.to_string(), IDLE, paused, now_ms()],
        )?;
        Ok(())
    }

    pub fn set_cancelled(&self, scope_target_id: Uuid, cancelled: bool) -> Result<()> {
        self.require_scope_target(scope_target_id)?;
        self.conn.execute(
            "INSERT INTO auto_scan_state(scope_target_id, current_step, is_cancelled, updated_ms) VALUES (?,?,?,?)
             ON CONFLICT(scope_target_id) DO UPDATE SET is_cancelled=excluded.is_cancelled, updated_ms=excluded.updated_ms",
            params![scope_target_id.to_string(), IDLE, cancelled, now_ms()],
        )?;
        Ok(())
    }

    /// Back to `IDLE` with both flags cleared.
    pub fn reset_auto_scan_state(&self, scope_target_id: Uuid) -> Result<()> {
        self.put_auto_scan_state(&AutoScanState::idle(scope_target_id)).map(|_| ())
    }

    /// The stored config, or defaults when none has been saved.
    pub fn auto_scan_config(&self) -> Result<AutoScanConfig> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT config_json FROM auto_scan_config WHERE id=1", [], |r| r.get(0))
            .optional()?;
        match json {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(AutoScanConfig::default()),
        }
    }

    pub fn put_auto_scan_config(&self, config: &AutoScanConfig) -> Result<AutoScanConfig> {
        self.conn.execute(
            "INSERT INTO auto_scan_config(id, config_json, updated_ms) VALUES (1,?,?)
             ON CONFLICT(id) DO UPDATE SET config_json=excluded.config_json, updated_ms=excluded.updated_ms",
            params![serde_json::to_string(config)?, now_ms()],
        )?;
        self.auto_scan_config()
    }

    /// Opens a `pending` session with the config frozen in.
    pub fn create_session(&self, scope_target_id: Uuid, config_snapshot: &AutoScanConfig) -> Result<AutoScanSession> {
        self.require_scope_target(scope_target_id)?;
        let id = Uuid::now_v7();
        self.conn.execute(
            "INSERT INTO auto_scan_sessions(id, scope_target_id, config_snapshot, status, started_ms) VALUES (?,?,?,?,?)",
            params![id.to_string(), scope_target_id.to_string(), serde_json::to_string(config_snapshot)?, SessionStatus::Pending.as_str(), now_ms()],
        )?;
        info!(session_id = %id, %scope_target_id, "auto-scan session created");
        self.session(id)
    }

    pub fn session(&self, id: Uuid) -> Result<AutoScanSession> {
        self.conn
            .query_row(&format!("SELECT {SESSION_COLUMNS} FROM auto_scan_sessions WHERE id=?"), [id.to_string()], session_from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    /// Newest first. `None` lists sessions of every target.
    pub fn list_sessions(&self, scope_target_id: Option<Uuid>) -> Result<Vec<AutoScanSession>> {
        let rows = match scope_target_id {
            Some(t) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM auto_scan_sessions WHERE scope_target_id=? ORDER BY started_ms DESC, id DESC"
                ))?;
                let rows = stmt.query_map([t.to_string()], session_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {SESSION_COLUMNS} FROM auto_scan_sessions ORDER BY started_ms DESC, id DESC"))?;
                let rows = stmt.query_map([], session_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Applies `next` only if it is more final than the stored status. Returns whether it was applied.
    pub fn advance_session(&self, id: Uuid, next: SessionStatus) -> Result<bool> {
        let session = self.session(id)?;
        if !session.status.can_advance_to(next) {
            debug!(session_id = %id, from = session.status.as_str(), to = next.as_str(), "status change ignored");
            return Ok(false);
        }
        let ended = if next.is_terminal() { Some(now_ms()) } else { None };
        self.conn.execute(
            "UPDATE auto_scan_sessions SET status=?, ended_ms=COALESCE(ended_ms, ?) WHERE id=?",
            params![next.as_str(), ended, id.to_string()],
        )?;
        Ok(true)
    }

    pub fn append_step_record(&self, id: Uuid, record: &StepRecord) -> Result<()> {
        let mut session = self.session(id)?;
        session.steps_run.push(record.clone());
        self.conn.execute(
            "UPDATE auto_scan_sessions SET steps_run=? WHERE id=?",
            params![serde_json::to_string(&session.steps_run)?, id.to_string()],
        )?;
        Ok(())
    }

    /// Terminal write from the orchestrator. A session that is already at least as final is
    /// left as it is, counts included.
    pub fn finish_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        counts: FinalCounts,
        error_message: Option<&str>,
    ) -> Result<AutoScanSession> {
        let session = self.session(id)?;
        if !session.status.can_advance_to(status) {
            info!(session_id = %id, stored = session.status.as_str(), requested = status.as_str(), "session already final");
            return Ok(session);
        }
        self.conn.execute(
            "UPDATE auto_scan_sessions SET status=?, ended_ms=COALESCE(ended_ms, ?), error_message=COALESCE(?, error_message),
             final_consolidated_subdomains=?, final_live_web_servers=? WHERE id=?",
            params![
                status.as_str(),
                now_ms(),
                error_message,
                counts.consolidated_subdomains as i64,
                counts.live_web_servers as i64,
                id.to_string()
            ],
        )?;
        self.session(id)
    }

    /// Sets final counts that are still missing, whatever the status. Used when an operator
    /// cancel got to the session before the orchestrator's own terminal write.
    pub fn fill_final_counts(&self, id: Uuid, counts: FinalCounts) -> Result<AutoScanSession> {
        let n = self.conn.execute(
            "UPDATE auto_scan_sessions SET final_consolidated_subdomains=COALESCE(final_consolidated_subdomains, ?),
             final_live_web_servers=COALESCE(final_live_web_servers, ?), ended_ms=COALESCE(ended_ms, ?) WHERE id=?",
            params![counts.consolidated_subdomains as i64, counts.live_web_servers as i64, now_ms(), id.to_string()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        self.session(id)
    }

    /// Operator cancel. A completed session is left alone and reported as such;
    /// otherwise the session moves to `cancelled` (or `completed` when asked) and the
    /// target's state is flagged so a running orchestrator stops at the next step boundary.
    pub fn cancel_session(&self, id: Uuid, mark_completed: bool) -> Result<CancelOutcome> {
        let session = self.session(id)?;
        if session.status == SessionStatus::Completed {
            return Ok(CancelOutcome { session, already_completed: true });
        }
        let next = if mark_completed { SessionStatus::Completed } else { SessionStatus::Cancelled };
        // Only a running session has a loop that reads the flag and then resets it.
        let was_running = session.status == SessionStatus::Running;
        self.advance_session(id, next)?;
        if was_running && !mark_completed {
            self.set_cancelled(session.scope_target_id, true)?;
        }
        Ok(CancelOutcome { session: self.session(id)?, already_completed: false })
    }

    /// Records the final counts and marks the session completed. The caller must name the
    /// session's own scope target; a mismatch changes nothing.
    pub fn record_final_stats(&self, id: Uuid, scope_target_id: Uuid, counts: FinalCounts) -> Result<AutoScanSession> {
        let session = self.session(id)?;
        if session.scope_target_id != scope_target_id {
            return Err(StoreError::ScopeMismatch { session_id: id, expected: session.scope_target_id, got: scope_target_id });
        }
        self.conn.execute(
            "UPDATE auto_scan_sessions SET final_consolidated_subdomains=?, final_live_web_servers=?, ended_ms=COALESCE(ended_ms, ?), status=? WHERE id=?",
            params![
                counts.consolidated_subdomains as i64,
                counts.live_web_servers as i64,
                now_ms(),
                SessionStatus::Completed.as_str(),
                id.to_string()
            ],
        )?;
        self.session(id)
    }

    /// Marks sessions left `pending`/`running` by a process that is gone as failed.
    pub fn fail_orphaned_sessions(&self, message: &str) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare("SELECT id FROM auto_scan_sessions WHERE status IN ('pending','running')")?;
        let ids = stmt.query_map([], |r| uuid_at(r, 0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        for id in &ids {
            self.conn.execute(
                "UPDATE auto_scan_sessions SET status='failed', ended_ms=COALESCE(ended_ms, ?), error_message=? WHERE id=?",
                params![now_ms(), message, id.to_string()],
            )?;
        }
        Ok(ids)
    }

    /// Targets whose state is stuck at a step although none of their sessions is active.
    pub fn stale_states(&self) -> Result<Vec<AutoScanState>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.scope_target_id, s.current_step, s.is_paused, s.is_cancelled, s.updated_ms FROM auto_scan_state s
             WHERE s.current_step <> ? AND NOT EXISTS (
               SELECT 1 FROM auto_scan_sessions a WHERE a.scope_target_id = s.scope_target_id AND a.status IN ('pending','running'))",
        )?;
        let rows = stmt.query_map([IDLE], state_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
