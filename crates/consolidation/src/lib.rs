//! Folds per-tool scan rows into the consolidated subdomain, company-domain and
//! network-range sets, and into the attack-surface graph.
//!
//! Every pass is a pure function of the successful scan rows present when it starts:
//! running it twice over the same rows leaves the store unchanged. Passes for one
//! scope target are serialized; malformed rows are logged and skipped.

mod graph;
mod locks;
mod ranges;
pub mod sources;
mod subdomains;

pub use graph::ConsolidationSummary;
pub use locks::TargetLocks;

use reconflow_core::{ConsolidatedCompanyDomain, ConsolidatedNetworkRange};
use results_sqlite::{Result, Store};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ConsolidationEngine {
    store: Store,
    locks: TargetLocks,
}

impl ConsolidationEngine {
    pub fn new(store: Store) -> Self {
        ConsolidationEngine { store, locks: TargetLocks::default() }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Rebuilds the target's consolidated subdomain set and returns it sorted.
    pub fn consolidate_subdomains(&self, scope_target_id: Uuid) -> Result<Vec<String>> {
        self.locks.run(scope_target_id, || subdomains::consolidate(&self.store, scope_target_id))
    }

    pub fn consolidate_company_domains(&self, scope_target_id: Uuid) -> Result<Vec<ConsolidatedCompanyDomain>> {
        self.locks.run(scope_target_id, || subdomains::consolidate_company(&self.store, scope_target_id))
    }

    /// One row per `(cidr_block, source)`, sorted by network then source.
    pub fn consolidate_network_ranges(&self, scope_target_id: Uuid) -> Result<Vec<ConsolidatedNetworkRange>> {
        self.locks.run(scope_target_id, || ranges::consolidate(&self.store, scope_target_id))
    }

    pub fn network_ranges(&self, scope_target_id: Uuid) -> Result<Vec<ConsolidatedNetworkRange>> {
        let mut rows = self.store.with(|db| db.consolidated_network_ranges(scope_target_id))?;
        ranges::sort_ranges(&mut rows);
        Ok(rows)
    }

    /// Rebuilds the attack-surface graph. Storage errors roll the whole pass back.
    pub fn consolidate_attack_surface(&self, scope_target_id: Uuid) -> Result<ConsolidationSummary> {
        self.locks.run(scope_target_id, || graph::consolidate(&self.store, scope_target_id))
    }

    pub fn live_web_server_count(&self, scope_target_id: Uuid) -> Result<u64> {
        subdomains::live_web_server_count(&self.store, scope_target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{ScanMode, ScopeTarget, TargetKind, Tool};
    use std::thread;

    #[test]
    fn concurrent_passes_on_one_target_agree() {
        let store = Store::in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Wildcard, ScanMode::Active, "*.example.com");
        store.with(|db| db.insert_scope_target(&t)).unwrap();
        store.with(|db| db.record_successful_scan(Tool::Subfinder, t.id, None, "a.example.com\nb.example.com")).unwrap();
        let engine = ConsolidationEngine::new(store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || engine.consolidate_subdomains(t.id).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec!["a.example.com", "b.example.com"]);
        }
        let summary = engine.consolidate_attack_surface(t.id).unwrap();
        assert_eq!(summary.counts.fqdns, 2);
    }

    #[test]
    fn full_company_flow() {
        let store = Store::in_memory().unwrap();
        let t = ScopeTarget::new(TargetKind::Company, ScanMode::Passive, "Example Corp");
        store.with(|db| db.insert_scope_target(&t)).unwrap();
        store.with(|db| db.record_successful_scan(Tool::CtlCompany, t.id, None, "shop.example.com\nexample.org")).unwrap();
        store
            .with(|db| {
                db.record_successful_scan(
                    Tool::AmassIntel,
                    t.id,
                    None,
                    r#"{"asns":[{"asn":"AS64500"}],"network_ranges":[{"cidr":"192.0.2.0/24","asn":"64500"}]}"#,
                )
            })
            .unwrap();
        store.with(|db| db.record_successful_scan(Tool::Amass, t.id, None, "www.example.com\nwww.unrelated.net")).unwrap();
        let engine = ConsolidationEngine::new(store);

        assert_eq!(engine.consolidate_company_domains(t.id).unwrap().len(), 2);
        assert_eq!(engine.consolidate_network_ranges(t.id).unwrap().len(), 1);
        assert_eq!(engine.consolidate_subdomains(t.id).unwrap(), vec!["www.example.com"]);
        let summary = engine.consolidate_attack_surface(t.id).unwrap();
        assert_eq!(summary.counts.asns, 1);
        assert_eq!(summary.counts.network_ranges, 1);
        assert_eq!(summary.counts.fqdns, 1);
        assert_eq!(summary.relationships, 1);
    }
}
