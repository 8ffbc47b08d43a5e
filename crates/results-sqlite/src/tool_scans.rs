use crate::models::ScanCompletion;
use crate::rows::{opt_uuid_at, parsed_at, time_at, to_ms, uuid_at};
use crate::{Db, Result, StoreError};
use reconflow_core::{ScanStatus, Tool, ToolScan};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const SCAN_COLUMNS: &str =
    "scan_id, scope_target_id, auto_scan_session_id, status, result, error, stdout, stderr, command, execution_time, created_ms";

fn scan_from_row(tool: Tool) -> impl Fn(&Row) -> rusqlite::Result<ToolScan> {
    move |r| {
        Ok(ToolScan {
            scan_id: uuid_at(r, 0)?,
            tool,
            scope_target_id: uuid_at(r, 1)?,
            auto_scan_session_id: opt_uuid_at(r, 2)?,
            status: parsed_at(r, 3)?,
            result: r.get(4)?,
            error: r.get(5)?,
            stdout: r.get(6)?,
            stderr: r.get(7)?,
            command: r.get(8)?,
            execution_time: r.get(9)?,
            created_at: time_at(r, 10)?,
        })
    }
}

impl Db {
    pub fn insert_tool_scan(&self, scan: &ToolScan) -> Result<()> {
        self.require_scope_target(scan.scope_target_id)?;
        self.conn.execute(
            &format!("INSERT INTO {}({SCAN_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?)", scan.tool.table()),
            params![
                scan.scan_id.to_string(),
                scan.scope_target_id.to_string(),
                scan.auto_scan_session_id.map(|id| id.to_string()),
                scan.status.as_str(),
                scan.result,
                scan.error,
                scan.stdout,
                scan.stderr,
                scan.command,
                scan.execution_time,
                to_ms(scan.created_at)
            ],
        )?;
        Ok(())
    }

    pub fn mark_tool_scan_running(&self, tool: Tool, scan_id: Uuid, command: Option<&str>) -> Result<()> {
        let n = self.conn.execute(
            &format!("UPDATE {} SET status='running', command=COALESCE(?, command) WHERE scan_id=? AND status='pending'", tool.table()),
            params![command, scan_id.to_string()],
        )?;
        if n == 0 {
            self.tool_scan(tool, scan_id)?;
            return Err(StoreError::InvalidInput(format!("{tool} scan {scan_id} is not pending")));
        }
        Ok(())
    }

    /// Moves a row to its terminal status. Terminal rows are never rewritten.
    pub fn complete_tool_scan(&self, tool: Tool, scan_id: Uuid, done: &ScanCompletion) -> Result<()> {
        if !done.status.is_terminal() {
            return Err(StoreError::InvalidInput(format!("{} is not a terminal scan status", done.status.as_str())));
        }
        let n = self.conn.execute(
            &format!(
                "UPDATE {} SET status=?, result=?, error=?, stdout=?, stderr=?, execution_time=? WHERE scan_id=? AND status IN ('pending','running')",
                tool.table()
            ),
            params![done.status.as_str(), done.result, done.error, done.stdout, done.stderr, done.execution_time, scan_id.to_string()],
        )?;
        if n == 0 {
            self.tool_scan(tool, scan_id)?;
            return Err(StoreError::InvalidInput(format!("{tool} scan {scan_id} already finished")));
        }
        Ok(())
    }

    pub fn tool_scan(&self, tool: Tool, scan_id: Uuid) -> Result<ToolScan> {
        self.conn
            .query_row(&format!("SELECT {SCAN_COLUMNS} FROM {} WHERE scan_id=?", tool.table()), [scan_id.to_string()], scan_from_row(tool))
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("{tool} scan {scan_id}")))
    }

    /// Successful rows for one tool and target, oldest first so later scans fold last.
    pub fn successful_tool_scans(&self, tool: Tool, scope_target_id: Uuid) -> Result<Vec<ToolScan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} WHERE scope_target_id=? AND status=? ORDER BY created_ms, scan_id",
            tool.table()
        ))?;
        let rows = stmt
            .query_map(params![scope_target_id.to_string(), ScanStatus::Success.as_str()], scan_from_row(tool))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn tool_scans_for_session(&self, tool: Tool, session_id: Uuid) -> Result<Vec<ToolScan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} WHERE auto_scan_session_id=? ORDER BY created_ms, scan_id",
            tool.table()
        ))?;
        let rows = stmt.query_map([session_id.to_string()], scan_from_row(tool))?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Convenience for imports and tests: a finished success row in one call.
    pub fn record_successful_scan(
        &self,
        tool: Tool,
        scope_target_id: Uuid,
        session_id: Option<Uuid>,
        result: impl Into<String>,
    ) -> Result<ToolScan> {
        let mut scan = ToolScan::new(tool, scope_target_id, session_id);
        scan.status = ScanStatus::Success;
        scan.result = Some(result.into());
        self.insert_tool_scan(&scan)?;
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{ScanMode, ScopeTarget, TargetKind};

    fn setup() -> (Db, ScopeTarget) {
        let db = Db::open_in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Wildcard, ScanMode::Active, "*.example.com");
        db.insert_scope_target(&t).unwrap();
        (db, t)
    }

    #[test]
    fn lifecycle_pending_running_success() {
        let (db, t) = setup();
        let scan = ToolScan::new(Tool::Subfinder, t.id, None);
        db.insert_tool_scan(&scan).unwrap();
        db.mark_tool_scan_running(Tool::Subfinder, scan.scan_id, Some("subfinder -d example.com")).unwrap();
        db.complete_tool_scan(Tool::Subfinder, scan.scan_id, &ScanCompletion::success("a.example.com")).unwrap();
        let back = db.tool_scan(Tool::Subfinder, scan.scan_id).unwrap();
        assert_eq!(back.status, ScanStatus::Success);
        assert_eq!(back.command.as_deref(), Some("subfinder -d example.com"));
        assert_eq!(db.successful_tool_scans(Tool::Subfinder, t.id).unwrap().len(), 1);
        assert!(db.successful_tool_scans(Tool::Amass, t.id).unwrap().is_empty());
    }

    #[test]
    fn terminal_rows_are_immutable() {
        let (db, t) = setup();
        let scan = db.record_successful_scan(Tool::Gau, t.id, None, "{}").unwrap();
        let err = db.complete_tool_scan(Tool::Gau, scan.scan_id, &ScanCompletion::failed("late")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(db.tool_scan(Tool::Gau, scan.scan_id).unwrap().status, ScanStatus::Success);
    }

    #[test]
    fn completing_unknown_scan_is_not_found() {
        let (db, _) = setup();
        let err = db.complete_tool_scan(Tool::Gau, Uuid::now_v7(), &ScanCompletion::failed("x")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn failed_rows_are_not_successful() {
        let (db, t) = setup();
        let scan = ToolScan::new(Tool::Amass, t.id, None);
        db.insert_tool_scan(&scan).unwrap();
        db.complete_tool_scan(Tool::Amass, scan.scan_id, &ScanCompletion::failed("rate limited")).unwrap();
        assert!(db.successful_tool_scans(Tool::Amass, t.id).unwrap().is_empty());
    }

    #[test]
    fn rows_cascade_with_their_target() {
        let (db, t) = setup();
        db.record_successful_scan(Tool::Amass, t.id, None, "a.example.com").unwrap();
        db.delete_scope_target(t.id).unwrap();
        let n: i64 = db.conn.query_row("SELECT COUNT(*) FROM amass_scans", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0);
    }
}
