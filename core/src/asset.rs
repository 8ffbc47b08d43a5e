//! The attack-surface graph: typed asset variants, edges and per-asset child rows.
//!
//! An asset's identity is `(scope_target_id, asset_type, asset_identifier)`. Two observations
//! of the same identity are folded together with [`AssetDetails::merge`]:
//! scalar fields are last-write-wins by scan recency, set fields are unioned and
//! scan timestamps only move forward.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Asn,
    NetworkRange,
    IpAddress,
    LiveWebServer,
    CloudAsset,
    Fqdn,
}

impl AssetType {
    pub const ALL: [AssetType; 6] = [
        AssetType::Asn,
        AssetType::NetworkRange,
        AssetType::IpAddress,
        AssetType::LiveWebServer,
        AssetType::CloudAsset,
        AssetType::Fqdn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Asn => "asn",
            AssetType::NetworkRange => "network_range",
            AssetType::IpAddress => "ip_address",
            AssetType::LiveWebServer => "live_web_server",
            AssetType::CloudAsset => "cloud_asset",
            AssetType::Fqdn => "fqdn",
        }
    }
}

impl FromStr for AssetType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL.into_iter().find(|t| t.as_str() == s).ok_or_else(|| ParseError::new("asset type", s))
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level merge of another observation of the same identity.
pub trait Merge {
    /// `newer_wins` is true when `other` was observed at or after the data already in `self`.
    fn merge(&mut self, other: Self, newer_wins: bool);
}

fn scalar<T>(dst: &mut Option<T>, src: Option<T>, newer_wins: bool) {
    if let Some(v) = src {
        if newer_wins || dst.is_none() {
            *dst = Some(v);
        }
    }
}

fn forward(dst: &mut Option<OffsetDateTime>, src: Option<OffsetDateTime>) {
    if let Some(v) = src {
        if dst.map_or(true, |cur| v > cur) {
            *dst = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsnDetails {
    pub asn_number: String,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
}

impl Merge for AsnDetails {
    fn merge(&mut self, other: Self, newer_wins: bool) {
        scalar(&mut self.organization, other.organization, newer_wins);
        scalar(&mut self.description, other.description, newer_wins);
        scalar(&mut self.country, other.country, newer_wins);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRangeDetails {
    pub cidr_block: String,
    pub subnet_size: Option<u64>,
    pub asn: Option<String>,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
    pub sources: BTreeSet<String>,
}

impl Merge for NetworkRangeDetails {
    fn merge(&mut self, other: Self, newer_wins: bool) {
        scalar(&mut self.subnet_size, other.subnet_size, newer_wins);
        scalar(&mut self.asn, other.asn, newer_wins);
        scalar(&mut self.organization, other.organization, newer_wins);
        scalar(&mut self.description, other.description, newer_wins);
        scalar(&mut self.country, other.country, newer_wins);
        self.sources.extend(other.sources);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpAddressDetails {
    pub ip_address: String,
    pub ip_type: Option<String>,
    pub asn: Option<String>,
    pub organization: Option<String>,
    pub country: Option<String>,
    pub hostnames: BTreeSet<String>,
    pub ptr_records: BTreeSet<String>,
}

impl Merge for IpAddressDetails {
    fn merge(&mut self, other: Self, newer_wins: bool) {
        scalar(&mut self.ip_type, other.ip_type, newer_wins);
        scalar(&mut self.asn, other.asn, newer_wins);
        scalar(&mut self.organization, other.organization, newer_wins);
        scalar(&mut self.country, other.country, newer_wins);
        self.hostnames.extend(other.hostnames);
        self.ptr_records.extend(other.ptr_records);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveWebServerDetails {
    pub url: String,
    pub domain: Option<String>,
    /// Every address the server was seen on.
    pub ip_addresses: BTreeSet<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub web_server: Option<String>,
    pub technologies: BTreeSet<String>,
    pub content_length: Option<u64>,
    pub screenshot_path: Option<String>,
}

impl Merge for LiveWebServerDetails {
    fn merge(&mut self, other: Self, newer_wins: bool) {
        scalar(&mut self.domain, other.domain, newer_wins);
        scalar(&mut self.port, other.port, newer_wins);
        scalar(&mut self.protocol, other.protocol, newer_wins);
        scalar(&mut self.status_code, other.status_code, newer_wins);
        scalar(&mut self.title, other.title, newer_wins);
        scalar(&mut self.web_server, other.web_server, newer_wins);
        scalar(&mut self.content_length, other.content_length, newer_wins);
        scalar(&mut self.screenshot_path, other.screenshot_path, newer_wins);
        self.technologies.extend(other.technologies);
        self.ip_addresses.extend(other.ip_addresses);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudAssetDetails {
    pub url: String,
    pub provider: Option<String>,
    pub service_type: Option<String>,
    pub region: Option<String>,
    pub domain: Option<String>,
}

impl Merge for CloudAssetDetails {
    fn merge(&mut self, other: Self, newer_wins: bool) {
        scalar(&mut self.provider, other.provider, newer_wins);
        scalar(&mut self.service_type, other.service_type, newer_wins);
        scalar(&mut self.region, other.region, newer_wins);
        scalar(&mut self.domain, other.domain, newer_wins);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FqdnDetails {
    pub fqdn: String,
    pub root_domain: Option<String>,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub name_servers: BTreeSet<String>,
    pub status: BTreeSet<String>,
    pub resolved_ips: BTreeSet<String>,
    pub a_records: BTreeSet<String>,
    pub aaaa_records: BTreeSet<String>,
    pub cname_records: BTreeSet<String>,
    pub mx_records: BTreeSet<String>,
    pub txt_records: BTreeSet<String>,
    pub ns_records: BTreeSet<String>,
    pub ssl_issuer: Option<String>,
    pub ssl_subject: Option<String>,
    pub ssl_expiry: Option<String>,
    pub ssl_protocols: BTreeSet<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_dns_scan: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_ssl_scan: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_whois_scan: Option<OffsetDateTime>,
}

impl Merge for FqdnDetails {
    fn merge(&mut self, other: Self, newer_wins: bool) {
        scalar(&mut self.root_domain, other.root_domain, newer_wins);
        scalar(&mut self.registrar, other.registrar, newer_wins);
        scalar(&mut self.creation_date, other.creation_date, newer_wins);
        scalar(&mut self.expiration_date, other.expiration_date, newer_wins);
        scalar(&mut self.ssl_issuer, other.ssl_issuer, newer_wins);
        scalar(&mut self.ssl_subject, other.ssl_subject, newer_wins);
        scalar(&mut self.ssl_expiry, other.ssl_expiry, newer_wins);
        self.name_servers.extend(other.name_servers);
        self.status.extend(other.status);
        self.resolved_ips.extend(other.resolved_ips);
        self.a_records.extend(other.a_records);
        self.aaaa_records.extend(other.aaaa_records);
        self.cname_records.extend(other.cname_records);
        self.mx_records.extend(other.mx_records);
        self.txt_records.extend(other.txt_records);
        self.ns_records.extend(other.ns_records);
        self.ssl_protocols.extend(other.ssl_protocols);
        forward(&mut self.last_dns_scan, other.last_dns_scan);
        forward(&mut self.last_ssl_scan, other.last_ssl_scan);
        forward(&mut self.last_whois_scan, other.last_whois_scan);
    }
}

/// Per-variant payload. The variant is the asset's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "asset_type", content = "details", rename_all = "snake_case")]
pub enum AssetDetails {
    Asn(AsnDetails),
    NetworkRange(NetworkRangeDetails),
    IpAddress(IpAddressDetails),
    LiveWebServer(LiveWebServerDetails),
    CloudAsset(CloudAssetDetails),
    Fqdn(FqdnDetails),
}

impl AssetDetails {
    pub fn asset_type(&self) -> AssetType {
        match self {
            AssetDetails::Asn(_) => AssetType::Asn,
            AssetDetails::NetworkRange(_) => AssetType::NetworkRange,
            AssetDetails::IpAddress(_) => AssetType::IpAddress,
            AssetDetails::LiveWebServer(_) => AssetType::LiveWebServer,
            AssetDetails::CloudAsset(_) => AssetType::CloudAsset,
            AssetDetails::Fqdn(_) => AssetType::Fqdn,
        }
    }

    /// Natural key within the asset type: ASN number, CIDR, IP, canonical URL, cloud URL or FQDN.
    pub fn identifier(&self) -> &str {
        match self {
            AssetDetails::Asn(d) => &d.asn_number,
            AssetDetails::NetworkRange(d) => &d.cidr_block,
            AssetDetails::IpAddress(d) => &d.ip_address,
            AssetDetails::LiveWebServer(d) => &d.url,
            AssetDetails::CloudAsset(d) => &d.url,
            AssetDetails::Fqdn(d) => &d.fqdn,
        }
    }

    /// Folds `other` into `self`. Returns false, leaving `self` untouched, when the variants differ.
    pub fn merge(&mut self, other: AssetDetails, newer_wins: bool) -> bool {
        match (self, other) {
            (AssetDetails::Asn(a), AssetDetails::Asn(b)) => a.merge(b, newer_wins),
            (AssetDetails::NetworkRange(a), AssetDetails::NetworkRange(b)) => a.merge(b, newer_wins),
            (AssetDetails::IpAddress(a), AssetDetails::IpAddress(b)) => a.merge(b, newer_wins),
            (AssetDetails::LiveWebServer(a), AssetDetails::LiveWebServer(b)) => a.merge(b, newer_wins),
            (AssetDetails::CloudAsset(a), AssetDetails::CloudAsset(b)) => a.merge(b, newer_wins),
            (AssetDetails::Fqdn(a), AssetDetails::Fqdn(b)) => a.merge(b, newer_wins),
            _ => return false,
        }
        true
    }
}

/// A stored node of the attack-surface graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSurfaceAsset {
    pub id: Uuid,
    pub scope_target_id: Uuid,
    pub asset_identifier: String,
    #[serde(flatten)]
    pub details: AssetDetails,
    /// Most recent scan time folded into this row.
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AttackSurfaceAsset {
    pub fn asset_type(&self) -> AssetType {
        self.details.asset_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Contains,
    ResolvesTo,
    Hosts,
    Subdomain,
    CloudService,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "contains",
            RelationshipType::ResolvesTo => "resolves_to",
            RelationshipType::Hosts => "hosts",
            RelationshipType::Subdomain => "subdomain",
            RelationshipType::CloudService => "cloud_service",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(RelationshipType::Contains),
            "resolves_to" => Ok(RelationshipType::ResolvesTo),
            "hosts" => Ok(RelationshipType::Hosts),
            "subdomain" => Ok(RelationshipType::Subdomain),
            "cloud_service" => Ok(RelationshipType::CloudService),
            _ => Err(ParseError::new("relationship type", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSurfaceRelationship {
    pub id: Uuid,
    pub parent_asset_id: Uuid,
    pub child_asset_id: Uuid,
    pub relationship_type: RelationshipType,
    pub relationship_data: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSurfaceDnsRecord {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub record_type: String,
    pub record_value: String,
    pub ttl: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSurfaceMetadata {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub metadata_type: String,
    pub metadata_key: String,
    pub metadata_value: Option<String>,
    pub metadata_json: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Per-type asset totals for one scope target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCounts {
    pub asns: u64,
    pub network_ranges: u64,
    pub ip_addresses: u64,
    pub live_web_servers: u64,
    pub cloud_assets: u64,
    pub fqdns: u64,
}

impl AssetCounts {
    pub fn slot(&mut self, asset_type: AssetType) -> &mut u64 {
        match asset_type {
            AssetType::Asn => &mut self.asns,
            AssetType::NetworkRange => &mut self.network_ranges,
            AssetType::IpAddress => &mut self.ip_addresses,
            AssetType::LiveWebServer => &mut self.live_web_servers,
            AssetType::CloudAsset => &mut self.cloud_assets,
            AssetType::Fqdn => &mut self.fqdns,
        }
    }

    pub fn total(&self) -> u64 {
        self.asns + self.network_ranges + self.ip_addresses + self.live_web_servers + self.cloud_assets + self.fqdns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn web(techs: &[&str], title: Option<&str>) -> AssetDetails {
        AssetDetails::LiveWebServer(LiveWebServerDetails {
            url: "https://example.com".into(),
            title: title.map(str::to_string),
            technologies: techs.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn technologies_union_instead_of_overwrite() {
        let mut merged = web(&["nginx"], Some("old"));
        assert!(merged.merge(web(&["nginx", "php"], None), true));
        let AssetDetails::LiveWebServer(d) = merged else { panic!("variant changed") };
        let techs: Vec<&str> = d.technologies.iter().map(String::as_str).collect();
        assert_eq!(techs, vec!["nginx", "php"]);
        // a missing scalar never erases a known one
        assert_eq!(d.title.as_deref(), Some("old"));
    }

    #[test]
    fn server_addresses_accumulate_across_scans() {
        let on = |ip: &str| {
            AssetDetails::LiveWebServer(LiveWebServerDetails {
                url: "https://example.com".into(),
                ip_addresses: [ip.to_string()].into(),
                ..Default::default()
            })
        };
        let mut merged = on("192.0.2.10");
        merged.merge(on("192.0.2.20"), false);
        let AssetDetails::LiveWebServer(d) = merged else { panic!("variant changed") };
        assert_eq!(d.ip_addresses.len(), 2);
    }

    #[test]
    fn scalars_follow_scan_recency() {
        let mut cur = web(&[], Some("current"));
        cur.merge(web(&[], Some("stale")), false);
        cur.merge(web(&[], Some("fresh")), true);
        let AssetDetails::LiveWebServer(d) = cur else { panic!("variant changed") };
        assert_eq!(d.title.as_deref(), Some("fresh"));

        let mut empty = web(&[], None);
        empty.merge(web(&[], Some("older")), false);
        let AssetDetails::LiveWebServer(d) = empty else { panic!("variant changed") };
        assert_eq!(d.title.as_deref(), Some("older"));
    }

    #[test]
    fn scan_timestamps_only_move_forward() {
        let mut a = FqdnDetails { fqdn: "a.example.com".into(), last_dns_scan: Some(datetime!(2024-05-01 0:00 UTC)), ..Default::default() };
        let older = FqdnDetails { fqdn: "a.example.com".into(), last_dns_scan: Some(datetime!(2024-01-01 0:00 UTC)), ..Default::default() };
        a.merge(older, true);
        assert_eq!(a.last_dns_scan, Some(datetime!(2024-05-01 0:00 UTC)));
    }

    #[test]
    fn mismatched_variants_do_not_merge() {
        let mut asn = AssetDetails::Asn(AsnDetails { asn_number: "1".into(), ..Default::default() });
        let before = asn.clone();
        assert!(!asn.merge(web(&["nginx"], None), true));
        assert_eq!(asn, before);
    }

    #[test]
    fn asset_serializes_type_next_to_identity() {
        let asset = AttackSurfaceAsset {
            id: Uuid::nil(),
            scope_target_id: Uuid::nil(),
            asset_identifier: "13335".into(),
            details: AssetDetails::Asn(AsnDetails { asn_number: "13335".into(), ..Default::default() }),
            observed_at: datetime!(2024-01-01 0:00 UTC),
            last_updated: datetime!(2024-01-01 0:00 UTC),
            created_at: datetime!(2024-01-01 0:00 UTC),
        };
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["asset_type"], "asn");
        assert_eq!(json["details"]["asn_number"], "13335");
    }
}
