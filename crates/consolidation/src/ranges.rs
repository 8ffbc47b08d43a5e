use crate::sources::{self, value_string, IntelRange};
use crate::subdomains::successful_scans;
use ipnet::IpNet;
use reconflow_core::names::normalize_asn;
use reconflow_core::{ConsolidatedNetworkRange, Tool};
use results_sqlite::{consolidated, Result, Store};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parses and truncates to the network address: `10.1.2.3/8` becomes `10.0.0.0/8`.
pub(crate) fn canonical_cidr(raw: &str) -> Option<IpNet> {
    IpNet::from_str(raw.trim()).ok().map(|net| net.trunc())
}

fn range_row(range: &IntelRange, cidr: IpNet, tool: Tool) -> ConsolidatedNetworkRange {
    ConsolidatedNetworkRange {
        cidr_block: cidr.to_string(),
        asn: value_string(&range.asn).and_then(|a| normalize_asn(&a)),
        organization: range.organization.clone(),
        description: range.description.clone(),
        country: range.country.clone(),
        source: tool.as_str().to_string(),
        scan_type: range.scan_type.clone().unwrap_or_else(|| tool.as_str().to_string()),
    }
}

/// Sorted numerically by network, then by source.
pub(crate) fn sort_ranges(ranges: &mut [ConsolidatedNetworkRange]) {
    ranges.sort_by(|a, b| {
        let key = |r: &ConsolidatedNetworkRange| canonical_cidr(&r.cidr_block);
        key(a).cmp(&key(b)).then_with(|| a.source.cmp(&b.source))
    });
}

pub(crate) fn consolidate(store: &Store, scope_target_id: Uuid) -> Result<Vec<ConsolidatedNetworkRange>> {
    let scans = store.with(|db| {
        db.scope_target(scope_target_id)?;
        successful_scans(db, &Tool::NETWORK_INTEL_SOURCES, scope_target_id)
    })?;

    // oldest scans first, so a later scan of the same source overwrites
    let mut rows: BTreeMap<(IpNet, Tool), ConsolidatedNetworkRange> = BTreeMap::new();
    for scan in &scans {
        let report = match sources::intel_report(scan) {
            Ok(report) => report,
            Err(err) => {
                warn!(tool = %scan.tool, scan_id = %scan.scan_id, error = %err, "skipping malformed scan row");
                continue;
            }
        };
        for range in &report.network_ranges {
            match canonical_cidr(&range.cidr) {
                Some(cidr) => {
                    rows.insert((cidr, scan.tool), range_row(range, cidr, scan.tool));
                }
                None => debug!(cidr = %range.cidr, "invalid cidr"),
            }
        }
    }
    let mut ranges: Vec<ConsolidatedNetworkRange> = rows.into_values().collect();
    sort_ranges(&mut ranges);

    let removed = store.with(|db| db.transaction(|tx| consolidated::replace_network_ranges(tx, scope_target_id, &ranges)))?;
    info!(%scope_target_id, ranges = ranges.len(), removed, "consolidated network ranges");
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{ScanMode, ScanStatus, ScopeTarget, TargetKind, ToolScan};

    fn setup() -> (Store, Uuid) {
        let store = Store::in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Company, ScanMode::Passive, "Example Corp");
        store.with(|db| db.insert_scope_target(&t)).unwrap();
        (store, t.id)
    }

    #[test]
    fn cidrs_are_canonicalised() {
        assert_eq!(canonical_cidr(" 10.1.2.3/8 ").unwrap().to_string(), "10.0.0.0/8");
        assert_eq!(canonical_cidr("2001:db8::1/32").unwrap().to_string(), "2001:db8::/32");
        assert!(canonical_cidr("10.0.0.0/33").is_none());
        assert!(canonical_cidr("example.com").is_none());
    }

    fn record_at(store: &Store, tool: Tool, id: Uuid, minutes_ago: i64, result: &str) {
        let mut scan = ToolScan::new(tool, id, None);
        scan.status = ScanStatus::Success;
        scan.result = Some(result.to_string());
        scan.created_at -= time::Duration::minutes(minutes_ago);
        store.with(|db| db.insert_tool_scan(&scan)).unwrap();
    }

    #[test]
    fn one_row_per_cidr_and_source() {
        let (store, id) = setup();
        let report = r#"{"network_ranges":[{"cidr":"192.0.2.0/24","asn":"AS64500","organization":"Old"},{"cidr":"bogus"}]}"#;
        record_at(&store, Tool::AmassIntel, id, 10, report);
        record_at(&store, Tool::AmassIntel, id, 5, r#"{"network_ranges":[{"cidr":"192.0.2.7/24","organization":"New"}]}"#);
        record_at(&store, Tool::MetabigorCompany, id, 1, r#"{"network_ranges":[{"cidr":"192.0.2.0/24"},{"cidr":"10.0.0.0/8"}]}"#);

        let ranges = consolidate(&store, id).unwrap();
        let keys: Vec<(&str, &str)> = ranges.iter().map(|r| (r.cidr_block.as_str(), r.source.as_str())).collect();
        assert_eq!(keys, vec![("10.0.0.0/8", "metabigor_company"), ("192.0.2.0/24", "amass_intel"), ("192.0.2.0/24", "metabigor_company")]);
        assert_eq!(ranges[1].organization.as_deref(), Some("New"));
        assert_eq!(store.with(|db| db.consolidated_network_ranges(id)).unwrap().len(), 3);
    }

    #[test]
    fn numeric_sort_beats_lexical() {
        let row = |cidr: &str| ConsolidatedNetworkRange {
            cidr_block: cidr.into(),
            asn: None,
            organization: None,
            description: None,
            country: None,
            source: "amass_intel".into(),
            scan_type: "amass_intel".into(),
        };
        let mut ranges = vec![row("100.0.0.0/8"), row("9.0.0.0/8"), row("20.0.0.0/8")];
        sort_ranges(&mut ranges);
        let cidrs: Vec<&str> = ranges.iter().map(|r| r.cidr_block.as_str()).collect();
        assert_eq!(cidrs, vec!["9.0.0.0/8", "20.0.0.0/8", "100.0.0.0/8"]);
    }
}
