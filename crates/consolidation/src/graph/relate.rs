//! Edges derived from the stored asset set.

use ipnet::IpNet;
use reconflow_core::names::{normalize_asn, normalize_name, registrable_domain, url_host};
use reconflow_core::{AssetDetails, AttackSurfaceAsset, RelationshipType};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Edge {
    pub parent: Uuid,
    pub child: Uuid,
    pub kind: RelationshipType,
    pub rule: &'static str,
}

pub(crate) fn derive(assets: &[AttackSurfaceAsset]) -> Vec<Edge> {
    let mut asns: HashMap<&str, Uuid> = HashMap::new();
    let mut ranges: Vec<(IpNet, Option<String>, Uuid)> = Vec::new();
    let mut ips: HashMap<IpAddr, Uuid> = HashMap::new();
    let mut fqdns: HashMap<&str, Uuid> = HashMap::new();
    for asset in assets {
        match &asset.details {
            AssetDetails::Asn(d) => {
                asns.insert(d.asn_number.as_str(), asset.id);
            }
            AssetDetails::NetworkRange(d) => {
                if let Ok(net) = d.cidr_block.parse::<IpNet>() {
                    ranges.push((net, d.asn.as_deref().and_then(normalize_asn), asset.id));
                }
            }
            AssetDetails::IpAddress(d) => {
                if let Ok(ip) = d.ip_address.parse::<IpAddr>() {
                    ips.insert(ip, asset.id);
                }
            }
            AssetDetails::Fqdn(d) => {
                fqdns.insert(d.fqdn.as_str(), asset.id);
            }
            _ => {}
        }
    }

    let mut edges = BTreeSet::new();
    let mut edge = |parent: Uuid, child: Uuid, kind: RelationshipType, rule: &'static str| {
        if parent != child {
            edges.insert(Edge { parent, child, kind, rule });
        }
    };

    for (net, asn, range_id) in &ranges {
        if let Some(asn_id) = asn.as_deref().and_then(|a| asns.get(a)) {
            edge(*asn_id, *range_id, RelationshipType::Contains, "asn_announces_range");
        }
        for (ip, ip_id) in &ips {
            if net.contains(ip) {
                edge(*range_id, *ip_id, RelationshipType::Contains, "range_contains_ip");
            }
        }
    }

    for asset in assets {
        match &asset.details {
            AssetDetails::LiveWebServer(d) => {
                for ip_id in d.ip_addresses.iter().filter_map(|ip| ip.parse::<IpAddr>().ok()).filter_map(|ip| ips.get(&ip)) {
                    edge(*ip_id, asset.id, RelationshipType::Hosts, "ip_serves_url");
                }
                let host = d.domain.clone().or_else(|| url_host(&d.url));
                if let Some(fqdn_id) = host.as_deref().and_then(|h| fqdns.get(h)) {
                    edge(*fqdn_id, asset.id, RelationshipType::Hosts, "url_host");
                }
            }
            AssetDetails::CloudAsset(d) => {
                if let Some(fqdn_id) = d.domain.as_deref().and_then(normalize_name).and_then(|h| fqdns.get(h.as_str()).copied()) {
                    edge(fqdn_id, asset.id, RelationshipType::CloudService, "cloud_domain");
                }
            }
            AssetDetails::Fqdn(d) => {
                for ip_id in d.resolved_ips.iter().filter_map(|ip| ip.parse::<IpAddr>().ok()).filter_map(|ip| ips.get(&ip)) {
                    edge(asset.id, *ip_id, RelationshipType::ResolvesTo, "dns_resolution");
                }
                let root = d.root_domain.clone().or_else(|| registrable_domain(&d.fqdn));
                if let Some(root_id) = root.as_deref().filter(|r| *r != d.fqdn).and_then(|r| fqdns.get(r)) {
                    edge(*root_id, asset.id, RelationshipType::Subdomain, "root_domain");
                }
            }
            _ => {}
        }
    }
    edges.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{
        AsnDetails, CloudAssetDetails, FqdnDetails, IpAddressDetails, LiveWebServerDetails, NetworkRangeDetails,
    };
    use time::OffsetDateTime;

    fn asset(details: AssetDetails) -> AttackSurfaceAsset {
        let now = OffsetDateTime::now_utc();
        AttackSurfaceAsset {
            id: Uuid::now_v7(),
            scope_target_id: Uuid::nil(),
            asset_identifier: details.identifier().to_string(),
            details,
            observed_at: now,
            last_updated: now,
            created_at: now,
        }
    }

    fn find(edges: &[Edge], parent: &AttackSurfaceAsset, child: &AttackSurfaceAsset) -> Option<RelationshipType> {
        edges.iter().find(|e| e.parent == parent.id && e.child == child.id).map(|e| e.kind)
    }

    #[test]
    fn full_chain_from_asn_to_web_server() {
        let asn = asset(AssetDetails::Asn(AsnDetails { asn_number: "64500".into(), ..Default::default() }));
        let range = asset(AssetDetails::NetworkRange(NetworkRangeDetails {
            cidr_block: "192.0.2.0/24".into(),
            asn: Some("AS64500".into()),
            ..Default::default()
        }));
        let ip = asset(AssetDetails::IpAddress(IpAddressDetails { ip_address: "192.0.2.10".into(), ..Default::default() }));
        let outside = asset(AssetDetails::IpAddress(IpAddressDetails { ip_address: "198.51.100.1".into(), ..Default::default() }));
        let root = asset(AssetDetails::Fqdn(FqdnDetails { fqdn: "example.com".into(), ..Default::default() }));
        let www = asset(AssetDetails::Fqdn(FqdnDetails {
            fqdn: "www.example.com".into(),
            root_domain: Some("example.com".into()),
            resolved_ips: ["192.0.2.10".to_string()].into(),
            ..Default::default()
        }));
        let web = asset(AssetDetails::LiveWebServer(LiveWebServerDetails {
            url: "https://www.example.com".into(),
            domain: Some("www.example.com".into()),
            ip_addresses: ["192.0.2.10".to_string()].into(),
            ..Default::default()
        }));
        let bucket = asset(AssetDetails::CloudAsset(CloudAssetDetails {
            url: "https://files.s3.amazonaws.com".into(),
            domain: Some("WWW.example.com".into()),
            ..Default::default()
        }));
        let all = vec![asn.clone(), range.clone(), ip.clone(), outside.clone(), root.clone(), www.clone(), web.clone(), bucket.clone()];
        let edges = derive(&all);

        assert_eq!(find(&edges, &asn, &range), Some(RelationshipType::Contains));
        assert_eq!(find(&edges, &range, &ip), Some(RelationshipType::Contains));
        assert_eq!(find(&edges, &range, &outside), None);
        assert_eq!(find(&edges, &ip, &web), Some(RelationshipType::Hosts));
        assert_eq!(find(&edges, &www, &web), Some(RelationshipType::Hosts));
        assert_eq!(find(&edges, &www, &ip), Some(RelationshipType::ResolvesTo));
        assert_eq!(find(&edges, &root, &www), Some(RelationshipType::Subdomain));
        assert_eq!(find(&edges, &www, &bucket), Some(RelationshipType::CloudService));
        assert_eq!(edges.len(), 7);
    }

    #[test]
    fn root_without_asset_yields_no_subdomain_edge() {
        let www = asset(AssetDetails::Fqdn(FqdnDetails { fqdn: "www.example.com".into(), ..Default::default() }));
        assert!(derive(&[www]).is_empty());
    }
}
