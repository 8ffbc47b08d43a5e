use crate::rows::{parsed_at, time_at, to_ms, uuid_at};
use crate::{Db, Result, StoreError};
use reconflow_core::ScopeTarget;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const TARGET_COLUMNS: &str = "id, kind, mode, target, active, created_ms";

fn target_from_row(r: &Row) -> rusqlite::Result<ScopeTarget> {
    Ok(ScopeTarget {
        id: uuid_at(r, 0)?,
        kind: parsed_at(r, 1)?,
        mode: parsed_at(r, 2)?,
        target: r.get(3)?,
        active: r.get(4)?,
        created_at: time_at(r, 5)?,
    })
}

impl Db {
    pub fn insert_scope_target(&self, target: &ScopeTarget) -> Result<()> {
        if target.target.trim().is_empty() {
            return Err(StoreError::InvalidInput("scope target must not be empty".into()));
        }
        self.conn.execute(
            "INSERT INTO scope_targets(id, kind, mode, target, active, created_ms) VALUES (?,?,?,?,?,?)",
            params![
                target.id.to_string(),
                target.kind.as_str(),
                target.mode.as_str(),
                target.target.trim(),
                target.active,
                to_ms(target.created_at)
            ],
        )?;
        Ok(())
    }

    pub fn scope_target(&self, id: Uuid) -> Result<ScopeTarget> {
        self.conn
            .query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM scope_targets WHERE id=?"),
                [id.to_string()],
                target_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("scope target {id}")))
    }

    pub fn scope_target_exists(&self, id: Uuid) -> Result<bool> {
        let n: i64 = self.conn.query_row("SELECT COUNT(1) FROM scope_targets WHERE id=?", [id.to_string()], |r| r.get(0))?;
        Ok(n > 0)
    }

    pub(crate) fn require_scope_target(&self, id: Uuid) -> Result<()> {
        if self.scope_target_exists(id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("scope target {id}")))
        }
    }

    pub fn list_scope_targets(&self) -> Result<Vec<ScopeTarget>> {
        let mut stmt = self.conn.prepare(&format!("SELECT {TARGET_COLUMNS} FROM scope_targets ORDER BY created_ms, id"))?;
        let rows = stmt.query_map([], target_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Deletes the target and, through the foreign keys, everything it owns.
    pub fn delete_scope_target(&self, id: Uuid) -> Result<()> {
        let n = self.conn.execute("DELETE FROM scope_targets WHERE id=?", [id.to_string()])?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("scope target {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{ScanMode, TargetKind};

    #[test]
    fn insert_read_delete() {
        let db = Db::open_in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Wildcard, ScanMode::Active, "*.example.com");
        db.insert_scope_target(&t).unwrap();
        let back = db.scope_target(t.id).unwrap();
        assert_eq!(back.target, "*.example.com");
        assert_eq!(back.kind, TargetKind::Wildcard);
        assert_eq!(db.list_scope_targets().unwrap().len(), 1);
        db.delete_scope_target(t.id).unwrap();
        assert!(matches!(db.scope_target(t.id), Err(StoreError::NotFound(_))));
        assert!(matches!(db.delete_scope_target(t.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn blank_target_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Company, ScanMode::Passive, "  ");
        assert!(matches!(db.insert_scope_target(&t), Err(StoreError::InvalidInput(_))));
    }
}
