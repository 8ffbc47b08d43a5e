//! Consolidated subdomain, company-domain and network-range sets.
//!
//! The `replace_*` writers take a bare connection so a consolidation pass can run them
//! inside its transaction. Each one upserts the new set and prunes rows that are no
//! longer produced.

use crate::rows::now_ms;
use crate::{Db, Result};
use reconflow_core::{ConsolidatedCompanyDomain, ConsolidatedNetworkRange};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use uuid::Uuid;

/// Returns the number of stale names removed.
pub fn replace_subdomains(conn: &Connection, scope_target_id: Uuid, names: &[String]) -> Result<usize> {
    let target = scope_target_id.to_string();
    let now = now_ms();
    {
        let mut insert = conn.prepare(
            "INSERT INTO consolidated_subdomains(scope_target_id, subdomain, created_ms) VALUES (?,?,?)
             ON CONFLICT(scope_target_id, subdomain) DO NOTHING",
        )?;
        for name in names {
            insert.execute(params![target, name, now])?;
        }
    }
    let keep: HashSet<&str> = names.iter().map(String::as_str).collect();
    let existing = subdomains(conn, scope_target_id)?;
    let mut delete = conn.prepare("DELETE FROM consolidated_subdomains WHERE scope_target_id=? AND subdomain=?")?;
    let mut removed = 0;
    for name in existing.iter().filter(|n| !keep.contains(n.as_str())) {
        removed += delete.execute(params![target, name])?;
    }
    Ok(removed)
}

pub fn subdomains(conn: &Connection, scope_target_id: Uuid) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT subdomain FROM consolidated_subdomains WHERE scope_target_id=? ORDER BY subdomain")?;
    let rows = stmt.query_map([scope_target_id.to_string()], |r| r.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

/// `rows` are `(domain, source, rank)`; lower rank means more trusted source.
pub fn replace_company_domains(conn: &Connection, scope_target_id: Uuid, rows: &[(String, String, i64)]) -> Result<usize> {
    let target = scope_target_id.to_string();
    let now = now_ms();
    {
        let mut upsert = conn.prepare(
            "INSERT INTO consolidated_company_domains(scope_target_id, domain, source, source_rank, created_ms) VALUES (?,?,?,?,?)
             ON CONFLICT(scope_target_id, domain, source) DO UPDATE SET source_rank=excluded.source_rank",
        )?;
        for (domain, source, rank) in rows {
            upsert.execute(params![target, domain, source, rank, now])?;
        }
    }
    let keep: HashSet<(&str, &str)> = rows.iter().map(|(d, s, _)| (d.as_str(), s.as_str())).collect();
    let mut stmt = conn.prepare("SELECT domain, source FROM consolidated_company_domains WHERE scope_target_id=?")?;
    let existing = stmt
        .query_map([&target], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut delete = conn.prepare("DELETE FROM consolidated_company_domains WHERE scope_target_id=? AND domain=? AND source=?")?;
    let mut removed = 0;
    for (domain, source) in existing.iter().filter(|(d, s)| !keep.contains(&(d.as_str(), s.as_str()))) {
        removed += delete.execute(params![target, domain, source])?;
    }
    Ok(removed)
}

/// One entry per domain, sources in trust order.
pub fn company_domains(conn: &Connection, scope_target_id: Uuid) -> Result<Vec<ConsolidatedCompanyDomain>> {
    let mut stmt = conn.prepare(
        "SELECT domain, source FROM consolidated_company_domains WHERE scope_target_id=? ORDER BY domain, source_rank, source",
    )?;
    let rows = stmt
        .query_map([scope_target_id.to_string()], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut out: Vec<ConsolidatedCompanyDomain> = Vec::new();
    for (domain, source) in rows {
        match out.last_mut() {
            Some(last) if last.domain == domain => last.sources.push(source),
            _ => out.push(ConsolidatedCompanyDomain { domain, sources: vec![source] }),
        }
    }
    Ok(out)
}

pub fn replace_network_ranges(conn: &Connection, scope_target_id: Uuid, ranges: &[ConsolidatedNetworkRange]) -> Result<usize> {
    let target = scope_target_id.to_string();
    let now = now_ms();
    {
        let mut upsert = conn.prepare(
            "INSERT INTO consolidated_network_ranges(scope_target_id, cidr_block, asn, organization, description, country, source, scan_type, created_ms)
             VALUES (?,?,?,?,?,?,?,?,?)
             ON CONFLICT(scope_target_id, cidr_block, source) DO UPDATE SET asn=excluded.asn, organization=excluded.organization,
               description=excluded.description, country=excluded.country, scan_type=excluded.scan_type",
        )?;
        for r in ranges {
            upsert.execute(params![target, r.cidr_block, r.asn, r.organization, r.description, r.country, r.source, r.scan_type, now])?;
        }
    }
    let keep: HashSet<(&str, &str)> = ranges.iter().map(|r| (r.cidr_block.as_str(), r.source.as_str())).collect();
    let existing = network_ranges(conn, scope_target_id)?;
    let mut delete = conn.prepare("DELETE FROM consolidated_network_ranges WHERE scope_target_id=? AND cidr_block=? AND source=?")?;
    let mut removed = 0;
    for r in existing.iter().filter(|r| !keep.contains(&(r.cidr_block.as_str(), r.source.as_str()))) {
        removed += delete.execute(params![target, r.cidr_block, r.source])?;
    }
    Ok(removed)
}

pub fn network_ranges(conn: &Connection, scope_target_id: Uuid) -> Result<Vec<ConsolidatedNetworkRange>> {
    let mut stmt = conn.prepare(
        "SELECT cidr_block, asn, organization, description, country, source, scan_type FROM consolidated_network_ranges
         WHERE scope_target_id=? ORDER BY cidr_block, source",
    )?;
    let rows = stmt
        .query_map([scope_target_id.to_string()], |r| {
            Ok(ConsolidatedNetworkRange {
                cidr_block: r.get(0)?,
                asn: r.get(1)?,
                organization: r.get(2)?,
                description: r.get(3)?,
                country: r.get(4)?,
                source: r.get(5)?,
                scan_type: r.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Db {
    pub fn consolidated_subdomains(&self, scope_target_id: Uuid) -> Result<Vec<String>> {
        subdomains(&self.conn, scope_target_id)
    }

    pub fn consolidated_subdomain_count(&self, scope_target_id: Uuid) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM consolidated_subdomains WHERE scope_target_id=?",
            [scope_target_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    pub fn consolidated_company_domains(&self, scope_target_id: Uuid) -> Result<Vec<ConsolidatedCompanyDomain>> {
        company_domains(&self.conn, scope_target_id)
    }

    pub fn consolidated_network_ranges(&self, scope_target_id: Uuid) -> Result<Vec<ConsolidatedNetworkRange>> {
        network_ranges(&self.conn, scope_target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{ScanMode, ScopeTarget, TargetKind};

    fn setup() -> (Db, ScopeTarget) {
        let db = Db::open_in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Company, ScanMode::Passive, "Example Corp");
        db.insert_scope_target(&t).unwrap();
        (db, t)
    }

    #[test]
    fn subdomain_replace_prunes_and_dedups() {
        let (db, t) = setup();
        let first = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        replace_subdomains(&db.conn, t.id, &first).unwrap();
        replace_subdomains(&db.conn, t.id, &first).unwrap();
        assert_eq!(db.consolidated_subdomain_count(t.id).unwrap(), 2);
        let removed = replace_subdomains(&db.conn, t.id, &["b.example.com".to_string()]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.consolidated_subdomains(t.id).unwrap(), vec!["b.example.com"]);
    }

    #[test]
    fn company_domains_group_sources_by_rank() {
        let (db, t) = setup();
        let rows = vec![
            ("example.com".to_string(), "ctl_company".to_string(), 2),
            ("example.com".to_string(), "google_dorking".to_string(), 0),
            ("example.net".to_string(), "reverse_whois".to_string(), 1),
        ];
        replace_company_domains(&db.conn, t.id, &rows).unwrap();
        let got = db.consolidated_company_domains(t.id).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].domain, "example.com");
        assert_eq!(got[0].sources, vec!["google_dorking", "ctl_company"]);
        assert_eq!(got[1].sources, vec!["reverse_whois"]);
    }

    #[test]
    fn ranges_stay_distinct_per_source() {
        let (db, t) = setup();
        let range = |source: &str| ConsolidatedNetworkRange {
            cidr_block: "192.0.2.0/24".into(),
            asn: Some("64500".into()),
            organization: None,
            description: None,
            country: None,
            source: source.into(),
            scan_type: source.into(),
        };
        replace_network_ranges(&db.conn, t.id, &[range("amass_intel"), range("metabigor_company")]).unwrap();
        replace_network_ranges(&db.conn, t.id, &[range("amass_intel"), range("metabigor_company")]).unwrap();
        assert_eq!(db.consolidated_network_ranges(t.id).unwrap().len(), 2);
    }
}
