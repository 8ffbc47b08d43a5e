//! Attack-surface graph tables. Writers take a bare connection so a consolidation pass
//! can run them inside a single transaction.

use crate::rows::{json_at, now_ms, opt_json_at, parsed_at, time_at, to_ms, uuid_at};
use crate::{Db, Result};
use reconflow_core::{
    AssetCounts, AssetDetails, AssetType, AttackSurfaceAsset, AttackSurfaceDnsRecord, AttackSurfaceMetadata,
    AttackSurfaceRelationship, RelationshipType,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

const ASSET_COLUMNS: &str =
    "id, scope_target_id, asset_type, asset_identifier, details_json, observed_ms, last_updated_ms, created_ms";

fn asset_from_row(r: &Row) -> rusqlite::Result<AttackSurfaceAsset> {
    Ok(AttackSurfaceAsset {
        id: uuid_at(r, 0)?,
        scope_target_id: uuid_at(r, 1)?,
        asset_identifier: r.get(3)?,
        details: json_at(r, 4)?,
        observed_at: time_at(r, 5)?,
        last_updated: time_at(r, 6)?,
        created_at: time_at(r, 7)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

pub fn find_asset(
    conn: &Connection,
    scope_target_id: Uuid,
    asset_type: AssetType,
    identifier: &str,
) -> Result<Option<AttackSurfaceAsset>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ASSET_COLUMNS} FROM attack_surface_assets WHERE scope_target_id=? AND asset_type=? AND asset_identifier=?"),
            params![scope_target_id.to_string(), asset_type.as_str(), identifier],
            asset_from_row,
        )
        .optional()?)
}

/// Inserts a new identity or folds `details` into the stored row. A row whose merged
/// content is unchanged is not rewritten, so `last_updated` only moves on real change.
pub fn upsert_asset(
    conn: &Connection,
    scope_target_id: Uuid,
    details: AssetDetails,
    observed_at: OffsetDateTime,
) -> Result<(Uuid, UpsertOutcome)> {
    let asset_type = details.asset_type();
    let identifier = details.identifier().to_string();
    let now = now_ms();
    match find_asset(conn, scope_target_id, asset_type, &identifier)? {
        Some(existing) => {
            let mut merged = existing.details.clone();
            merged.merge(details, observed_at >= existing.observed_at);
            let observed = existing.observed_at.max(observed_at);
            if merged == existing.details && observed == existing.observed_at {
                return Ok((existing.id, UpsertOutcome::Unchanged));
            }
            conn.execute(
                "UPDATE attack_surface_assets SET details_json=?, observed_ms=?, last_updated_ms=? WHERE id=?",
                params![serde_json::to_string(&merged)?, to_ms(observed), now, existing.id.to_string()],
            )?;
            Ok((existing.id, UpsertOutcome::Updated))
        }
        None => {
            let id = Uuid::now_v7();
            conn.execute(
                &format!("INSERT INTO attack_surface_assets({ASSET_COLUMNS}) VALUES (?,?,?,?,?,?,?,?)"),
                params![
                    id.to_string(),
                    scope_target_id.to_string(),
                    asset_type.as_str(),
                    identifier,
                    serde_json::to_string(&details)?,
                    to_ms(observed_at),
                    now,
                    now
                ],
            )?;
            Ok((id, UpsertOutcome::Inserted))
        }
    }
}

pub fn upsert_relationship(
    conn: &Connection,
    parent: Uuid,
    child: Uuid,
    kind: RelationshipType,
    data: Option<&Value>,
) -> Result<Uuid> {
    let data = data.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO attack_surface_relationships(id, parent_asset_id, child_asset_id, relationship_type, relationship_data, created_ms)
         VALUES (?,?,?,?,?,?)
         ON CONFLICT(parent_asset_id, child_asset_id, relationship_type) DO UPDATE SET relationship_data=excluded.relationship_data",
        params![Uuid::now_v7().to_string(), parent.to_string(), child.to_string(), kind.as_str(), data, now_ms()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM attack_surface_relationships WHERE parent_asset_id=? AND child_asset_id=? AND relationship_type=?",
        params![parent.to_string(), child.to_string(), kind.as_str()],
        |r| uuid_at(r, 0),
    )?;
    Ok(id)
}

pub fn upsert_dns_record(conn: &Connection, asset_id: Uuid, record_type: &str, value: &str, ttl: Option<i64>) -> Result<Uuid> {
    conn.execute(
        "INSERT INTO attack_surface_dns_records(id, asset_id, record_type, record_value, ttl, created_ms) VALUES (?,?,?,?,?,?)
         ON CONFLICT(asset_id, record_type, record_value) DO UPDATE SET ttl=COALESCE(excluded.ttl, attack_surface_dns_records.ttl)",
        params![Uuid::now_v7().to_string(), asset_id.to_string(), record_type, value, ttl, now_ms()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM attack_surface_dns_records WHERE asset_id=? AND record_type=? AND record_value=?",
        params![asset_id.to_string(), record_type, value],
        |r| uuid_at(r, 0),
    )?;
    Ok(id)
}

pub fn upsert_metadata(
    conn: &Connection,
    asset_id: Uuid,
    metadata_type: &str,
    key: &str,
    value: Option<&str>,
    json: Option<&Value>,
) -> Result<Uuid> {
    let json = json.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO attack_surface_metadata(id, asset_id, metadata_type, metadata_key, metadata_value, metadata_json, created_ms)
         VALUES (?,?,?,?,?,?,?)
         ON CONFLICT(asset_id, metadata_type, metadata_key) DO UPDATE SET metadata_value=excluded.metadata_value, metadata_json=excluded.metadata_json",
        params![Uuid::now_v7().to_string(), asset_id.to_string(), metadata_type, key, value, json, now_ms()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM attack_surface_metadata WHERE asset_id=? AND metadata_type=? AND metadata_key=?",
        params![asset_id.to_string(), metadata_type, key],
        |r| uuid_at(r, 0),
    )?;
    Ok(id)
}

fn prune(conn: &Connection, select_sql: &str, delete_sql: &str, scope_target_id: Uuid, keep: &HashSet<Uuid>) -> Result<usize> {
    let mut stmt = conn.prepare(select_sql)?;
    let ids = stmt.query_map([scope_target_id.to_string()], |r| uuid_at(r, 0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    let mut delete = conn.prepare(delete_sql)?;
    let mut removed = 0;
    for id in ids.iter().filter(|id| !keep.contains(id)) {
        removed += delete.execute([id.to_string()])?;
    }
    Ok(removed)
}

/// Deletes the target's assets whose ids are not in `keep`. Child rows go with them.
pub fn prune_assets(conn: &Connection, scope_target_id: Uuid, keep: &HashSet<Uuid>) -> Result<usize> {
    prune(
        conn,
        "SELECT id FROM attack_surface_assets WHERE scope_target_id=?",
        "DELETE FROM attack_surface_assets WHERE id=?",
        scope_target_id,
        keep,
    )
}

pub fn prune_relationships(conn: &Connection, scope_target_id: Uuid, keep: &HashSet<Uuid>) -> Result<usize> {
    prune(
        conn,
        "SELECT r.id FROM attack_surface_relationships r JOIN attack_surface_assets a ON a.id = r.parent_asset_id WHERE a.scope_target_id=?",
        "DELETE FROM attack_surface_relationships WHERE id=?",
        scope_target_id,
        keep,
    )
}

pub fn prune_dns_records(conn: &Connection, scope_target_id: Uuid, keep: &HashSet<Uuid>) -> Result<usize> {
    prune(
        conn,
        "SELECT d.id FROM attack_surface_dns_records d JOIN attack_surface_assets a ON a.id = d.asset_id WHERE a.scope_target_id=?",
        "DELETE FROM attack_surface_dns_records WHERE id=?",
        scope_target_id,
        keep,
    )
}

pub fn prune_metadata(conn: &Connection, scope_target_id: Uuid, keep: &HashSet<Uuid>) -> Result<usize> {
    prune(
        conn,
        "SELECT m.id FROM attack_surface_metadata m JOIN attack_surface_assets a ON a.id = m.asset_id WHERE a.scope_target_id=?",
        "DELETE FROM attack_surface_metadata WHERE id=?",
        scope_target_id,
        keep,
    )
}

/// Ordered by type, then identifier.
pub fn assets(conn: &Connection, scope_target_id: Uuid, asset_type: Option<AssetType>) -> Result<Vec<AttackSurfaceAsset>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ASSET_COLUMNS} FROM attack_surface_assets WHERE scope_target_id=?1 AND (?2 IS NULL OR asset_type=?2)
         ORDER BY asset_type, asset_identifier"
    ))?;
    let rows = stmt
        .query_map(params![scope_target_id.to_string(), asset_type.map(|t| t.as_str())], asset_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn relationships(conn: &Connection, scope_target_id: Uuid) -> Result<Vec<AttackSurfaceRelationship>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.parent_asset_id, r.child_asset_id, r.relationship_type, r.relationship_data, r.created_ms
         FROM attack_surface_relationships r JOIN attack_surface_assets a ON a.id = r.parent_asset_id
         WHERE a.scope_target_id=? ORDER BY r.relationship_type, r.parent_asset_id, r.child_asset_id",
    )?;
    let rows = stmt
        .query_map([scope_target_id.to_string()], |r| {
            Ok(AttackSurfaceRelationship {
                id: uuid_at(r, 0)?,
                parent_asset_id: uuid_at(r, 1)?,
                child_asset_id: uuid_at(r, 2)?,
                relationship_type: parsed_at(r, 3)?,
                relationship_data: opt_json_at(r, 4)?,
                created_at: time_at(r, 5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn dns_records(conn: &Connection, scope_target_id: Uuid) -> Result<Vec<AttackSurfaceDnsRecord>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.asset_id, d.record_type, d.record_value, d.ttl, d.created_ms
         FROM attack_surface_dns_records d JOIN attack_surface_assets a ON a.id = d.asset_id
         WHERE a.scope_target_id=? ORDER BY a.asset_identifier, d.record_type, d.record_value",
    )?;
    let rows = stmt
        .query_map([scope_target_id.to_string()], |r| {
            Ok(AttackSurfaceDnsRecord {
                id: uuid_at(r, 0)?,
                asset_id: uuid_at(r, 1)?,
                record_type: r.get(2)?,
                record_value: r.get(3)?,
                ttl: r.get(4)?,
                created_at: time_at(r, 5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn metadata(conn: &Connection, scope_target_id: Uuid) -> Result<Vec<AttackSurfaceMetadata>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.asset_id, m.metadata_type, m.metadata_key, m.metadata_value, m.metadata_json, m.created_ms
         FROM attack_surface_metadata m JOIN attack_surface_assets a ON a.id = m.asset_id
         WHERE a.scope_target_id=? ORDER BY a.asset_identifier, m.metadata_type, m.metadata_key",
    )?;
    let rows = stmt
        .query_map([scope_target_id.to_string()], |r| {
            Ok(AttackSurfaceMetadata {
                id: uuid_at(r, 0)?,
                asset_id: uuid_at(r, 1)?,
                metadata_type: r.get(2)?,
                metadata_key: r.get(3)?,
                metadata_value: r.get(4)?,
                metadata_json: opt_json_at(r, 5)?,
                created_at: time_at(r, 6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn asset_counts(conn: &Connection, scope_target_id: Uuid) -> Result<AssetCounts> {
    let mut stmt = conn.prepare("SELECT asset_type, COUNT(*) FROM attack_surface_assets WHERE scope_target_id=? GROUP BY asset_type")?;
    let rows = stmt
        .query_map([scope_target_id.to_string()], |r| Ok((parsed_at::<AssetType>(r, 0)?, r.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut counts = AssetCounts::default();
    for (asset_type, n) in rows {
        *counts.slot(asset_type) = n.max(0) as u64;
    }
    Ok(counts)
}

impl Db {
    pub fn attack_surface_assets(&self, scope_target_id: Uuid, asset_type: Option<AssetType>) -> Result<Vec<AttackSurfaceAsset>> {
        assets(&self.conn, scope_target_id, asset_type)
    }

    pub fn attack_surface_relationships(&self, scope_target_id: Uuid) -> Result<Vec<AttackSurfaceRelationship>> {
        relationships(&self.conn, scope_target_id)
    }

    pub fn attack_surface_dns_records(&self, scope_target_id: Uuid) -> Result<Vec<AttackSurfaceDnsRecord>> {
        dns_records(&self.conn, scope_target_id)
    }

    pub fn attack_surface_metadata(&self, scope_target_id: Uuid) -> Result<Vec<AttackSurfaceMetadata>> {
        metadata(&self.conn, scope_target_id)
    }

    pub fn attack_surface_asset_counts(&self, scope_target_id: Uuid) -> Result<AssetCounts> {
        asset_counts(&self.conn, scope_target_id)
    }
}
