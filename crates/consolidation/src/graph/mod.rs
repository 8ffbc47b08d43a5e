//! The attack-surface pass: read every source, fold candidates per identity, then write
//! assets, edges and child rows in one transaction and prune what this pass did not produce.

mod collect;
mod relate;

use crate::subdomains::{scope_roots, successful_scans};
use collect::{Collected, Inputs};
use reconflow_core::{AssetCounts, AssetType, Tool};
use results_sqlite::graph::{self, UpsertOutcome};
use results_sqlite::{Result, Store};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::info;
use uuid::Uuid;

const GRAPH_SOURCES: [Tool; 8] = [
    Tool::IpPortScan,
    Tool::Httpx,
    Tool::NucleiScreenshot,
    Tool::Metadata,
    Tool::CloudEnum,
    Tool::Dnsx,
    Tool::Whois,
    Tool::SslScan,
];

/// What one attack-surface pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationSummary {
    pub counts: AssetCounts,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub relationships: usize,
    pub dns_records: usize,
    pub metadata: usize,
    pub skipped_rows: usize,
}

fn load(db: &results_sqlite::Db, scope_target_id: Uuid) -> Result<Inputs> {
    let target = db.scope_target(scope_target_id)?;
    let mut scans = BTreeMap::new();
    let tools = Tool::SUBDOMAIN_SOURCES.iter().chain(Tool::NETWORK_INTEL_SOURCES.iter()).chain(GRAPH_SOURCES.iter());
    for tool in tools {
        scans.insert(*tool, successful_scans(db, &[*tool], scope_target_id)?);
    }
    let ranges = db
        .consolidated_network_ranges(scope_target_id)?
        .into_iter()
        .map(|r| (r.cidr_block, r.source))
        .collect::<BTreeSet<_>>();
    Ok(Inputs {
        roots: scope_roots(db, &target)?,
        subdomains: db.consolidated_subdomains(scope_target_id)?.into_iter().collect(),
        ranges,
        scans,
    })
}

fn write(tx: &Connection, scope_target_id: Uuid, collected: Collected) -> Result<ConsolidationSummary> {
    let mut summary = ConsolidationSummary { skipped_rows: collected.skipped_rows, ..Default::default() };

    let mut ids: HashMap<(AssetType, String), Uuid> = HashMap::with_capacity(collected.assets.len());
    for (key, folded) in collected.assets {
        let (id, outcome) = graph::upsert_asset(tx, scope_target_id, folded.details, folded.observed_at)?;
        match outcome {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Updated => summary.updated += 1,
            UpsertOutcome::Unchanged => summary.unchanged += 1,
        }
        ids.insert(key, id);
    }
    let keep: HashSet<Uuid> = ids.values().copied().collect();
    summary.pruned = graph::prune_assets(tx, scope_target_id, &keep)?;

    // edges come from the merged rows, not from this pass's candidates alone
    let stored = graph::assets(tx, scope_target_id, None)?;
    let mut keep_edges = HashSet::new();
    for edge in relate::derive(&stored) {
        let data = json!({ "derived_from": edge.rule });
        keep_edges.insert(graph::upsert_relationship(tx, edge.parent, edge.child, edge.kind, Some(&data))?);
    }
    graph::prune_relationships(tx, scope_target_id, &keep_edges)?;
    summary.relationships = keep_edges.len();

    let mut keep_dns = HashSet::new();
    for ((fqdn, record_type, value), ttl) in &collected.dns {
        if let Some(asset_id) = ids.get(&(AssetType::Fqdn, fqdn.clone())) {
            keep_dns.insert(graph::upsert_dns_record(tx, *asset_id, record_type, value, *ttl)?);
        }
    }
    graph::prune_dns_records(tx, scope_target_id, &keep_dns)?;
    summary.dns_records = keep_dns.len();

    let mut keep_meta = HashSet::new();
    for ((asset, metadata_type, key), meta) in &collected.metadata {
        if let Some(asset_id) = ids.get(asset) {
            let id = graph::upsert_metadata(tx, *asset_id, metadata_type, key, meta.value.as_deref(), meta.json.as_ref())?;
            keep_meta.insert(id);
        }
    }
    graph::prune_metadata(tx, scope_target_id, &keep_meta)?;
    summary.metadata = keep_meta.len();

    summary.counts = graph::asset_counts(tx, scope_target_id)?;
    Ok(summary)
}

pub(crate) fn consolidate(store: &Store, scope_target_id: Uuid) -> Result<ConsolidationSummary> {
    let inputs = store.with(|db| load(db, scope_target_id))?;
    let collected = collect::collect(&inputs);
    let summary = store.with(|db| db.transaction(|tx| write(tx, scope_target_id, collected)))?;
    info!(
        %scope_target_id,
        assets = summary.counts.total(),
        inserted = summary.inserted,
        updated = summary.updated,
        pruned = summary.pruned,
        relationships = summary.relationships,
        skipped_rows = summary.skipped_rows,
        "consolidated attack surface"
    );
    Ok(summary)
}
