use crate::{Db, Result};
use uuid::Uuid;

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// Sessions of this target that have not reached a terminal status.
    pub fn active_session_count(&self, scope_target_id: Uuid) -> Result<u64> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM auto_scan_sessions WHERE scope_target_id=? AND status IN ('pending','running')",
            [scope_target_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(cnt.max(0) as u64)
    }
}
