use crate::sources;
use reconflow_core::names::{canonical_url, in_scope, registrable_domain};
use reconflow_core::{ConsolidatedCompanyDomain, ScopeTarget, Tool, ToolScan};
use results_sqlite::{consolidated, Db, Result, Store};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Roots an in-scope name must sit under. Empty means "anything goes": a Company target
/// before any company domain has been consolidated.
pub(crate) fn scope_roots(db: &Db, target: &ScopeTarget) -> Result<Vec<String>> {
    Ok(match target.base_domain() {
        Some(base) => vec![base],
        None => db.consolidated_company_domains(target.id)?.into_iter().map(|d| d.domain).collect(),
    })
}

pub(crate) fn within(roots: &[String], name: &str) -> bool {
    roots.is_empty() || roots.iter().any(|root| in_scope(name, root))
}

pub(crate) fn successful_scans(db: &Db, tools: &[Tool], scope_target_id: Uuid) -> Result<Vec<ToolScan>> {
    let mut scans = Vec::new();
    for tool in tools {
        scans.extend(db.successful_tool_scans(*tool, scope_target_id)?);
    }
    Ok(scans)
}

fn skip(scan: &ToolScan, err: &anyhow::Error) {
    warn!(tool = %scan.tool, scan_id = %scan.scan_id, error = %err, "skipping malformed scan row");
}

/// Every in-scope name any subdomain tool reported, deduplicated and sorted.
pub(crate) fn consolidate(store: &Store, scope_target_id: Uuid) -> Result<Vec<String>> {
    let (roots, scans) = store.with(|db| {
        let target = db.scope_target(scope_target_id)?;
        Ok((scope_roots(db, &target)?, successful_scans(db, &Tool::SUBDOMAIN_SOURCES, scope_target_id)?))
    })?;

    let mut names = BTreeSet::new();
    let mut out_of_scope = 0usize;
    for scan in &scans {
        match sources::subdomain_names(scan) {
            Ok(found) => {
                for name in found {
                    if within(&roots, &name) {
                        names.insert(name);
                    } else {
                        out_of_scope += 1;
                    }
                }
            }
            Err(err) => skip(scan, &err),
        }
    }
    let names: Vec<String> = names.into_iter().collect();

    let removed = store.with(|db| db.transaction(|tx| consolidated::replace_subdomains(tx, scope_target_id, &names)))?;
    debug!(%scope_target_id, out_of_scope, "dropped out-of-scope names");
    info!(%scope_target_id, rows = scans.len(), subdomains = names.len(), removed, "consolidated subdomains");
    Ok(names)
}

/// Registrable domains from the company sources, one row per (domain, source).
pub(crate) fn consolidate_company(store: &Store, scope_target_id: Uuid) -> Result<Vec<ConsolidatedCompanyDomain>> {
    let scans = store.with(|db| {
        db.scope_target(scope_target_id)?;
        successful_scans(db, &Tool::COMPANY_DOMAIN_SOURCES, scope_target_id)
    })?;

    let mut rows: BTreeMap<(String, Tool), i64> = BTreeMap::new();
    for scan in &scans {
        let rank = Tool::COMPANY_DOMAIN_SOURCES.iter().position(|t| *t == scan.tool).map_or(i64::MAX, |i| i as i64);
        match sources::company_domains(scan) {
            Ok(found) => {
                for domain in found.iter().filter_map(|d| registrable_domain(d)) {
                    rows.insert((domain, scan.tool), rank);
                }
            }
            Err(err) => skip(scan, &err),
        }
    }
    let rows: Vec<(String, String, i64)> =
        rows.into_iter().map(|((domain, tool), rank)| (domain, tool.as_str().to_string(), rank)).collect();

    store.with(|db| {
        let removed = db.transaction(|tx| consolidated::replace_company_domains(tx, scope_target_id, &rows))?;
        let domains = db.consolidated_company_domains(scope_target_id)?;
        info!(%scope_target_id, domains = domains.len(), removed, "consolidated company domains");
        Ok(domains)
    })
}

/// Distinct canonical URLs across the target's successful httpx rows.
pub(crate) fn live_web_server_count(store: &Store, scope_target_id: Uuid) -> Result<u64> {
    let scans = store.with(|db| db.successful_tool_scans(Tool::Httpx, scope_target_id))?;
    let mut urls = BTreeSet::new();
    for scan in &scans {
        match sources::httpx_lines(scan) {
            Ok(lines) => urls.extend(lines.iter().filter_map(|l| canonical_url(&l.url))),
            Err(err) => skip(scan, &err),
        }
    }
    Ok(urls.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{ScanMode, TargetKind};

    fn store_with(kind: TargetKind, target: &str) -> (Store, ScopeTarget) {
        let store = Store::in_memory().unwrap();
        let t = ScopeTarget::new(kind, ScanMode::Active, target);
        store.with(|db| db.insert_scope_target(&t)).unwrap();
        (store, t)
    }

    fn record(store: &Store, tool: Tool, target: Uuid, result: &str) {
        store.with(|db| db.record_successful_scan(tool, target, None, result)).unwrap();
    }

    #[test]
    fn union_is_scoped_sorted_and_deduplicated() {
        let (store, t) = store_with(TargetKind::Wildcard, "*.example.com");
        record(&store, Tool::Subfinder, t.id, "b.example.com\na.example.com\nevil.com\nnotexample.com");
        record(&store, Tool::Amass, t.id, "A.EXAMPLE.COM\nc.example.com.");
        record(&store, Tool::Gau, t.id, "{\"url\":\"https://d.example.com/x\"}");
        let names = consolidate(&store, t.id).unwrap();
        assert_eq!(names, vec!["a.example.com", "b.example.com", "c.example.com", "d.example.com"]);
    }

    #[test]
    fn rerun_is_idempotent_and_refreshes() {
        let (store, t) = store_with(TargetKind::Wildcard, "*.example.com");
        record(&store, Tool::Subfinder, t.id, "a.example.com");
        let first = consolidate(&store, t.id).unwrap();
        let second = consolidate(&store, t.id).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.with(|db| db.consolidated_subdomain_count(t.id)).unwrap(), 1);
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let (store, t) = store_with(TargetKind::Wildcard, "*.example.com");
        record(&store, Tool::Gau, t.id, "this is not json");
        record(&store, Tool::Assetfinder, t.id, "ok.example.com");
        assert_eq!(consolidate(&store, t.id).unwrap(), vec!["ok.example.com"]);
    }

    #[test]
    fn company_targets_scope_by_company_domains() {
        let (store, t) = store_with(TargetKind::Company, "Example Corp");
        record(&store, Tool::ReverseWhois, t.id, "example.com\nexample.net");
        record(&store, Tool::GoogleDorking, t.id, "www.example.com");
        let domains = consolidate_company(&store, t.id).unwrap();
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].domain, "example.com");
        assert_eq!(domains[0].sources, vec!["google_dorking", "reverse_whois"]);

        record(&store, Tool::Subfinder, t.id, "api.example.net\nother.org");
        assert_eq!(consolidate(&store, t.id).unwrap(), vec!["api.example.net"]);
    }

    #[test]
    fn live_count_uses_canonical_urls() {
        let (store, t) = store_with(TargetKind::Wildcard, "*.example.com");
        record(
            &store,
            Tool::Httpx,
            t.id,
            "{\"url\":\"https://a.example.com:443/\"}\n{\"url\":\"https://a.example.com\"}\n{\"url\":\"http://a.example.com\"}",
        );
        assert_eq!(live_web_server_count(&store, t.id).unwrap(), 2);
    }

    #[test]
    fn unknown_target_is_not_found() {
        let store = Store::in_memory().unwrap();
        let err = consolidate(&store, Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, results_sqlite::StoreError::NotFound(_)));
    }
}
