//! Turns scan rows into folded per-identity candidates, without touching the store.

use crate::ranges::canonical_cidr;
use crate::sources::{self, value_string, HttpxLine};
use crate::subdomains::within;
use ipnet::IpNet;
use reconflow_core::names::{canonical_url, normalize_asn, normalize_name, registrable_domain};
use reconflow_core::{
    AsnDetails, AssetDetails, AssetType, CloudAssetDetails, FqdnDetails, IpAddressDetails, LiveWebServerDetails,
    NetworkRangeDetails, Tool, ToolScan,
};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

pub(crate) type AssetKey = (AssetType, String);

/// Everything the graph pass reads, loaded under one store lock.
pub(crate) struct Inputs {
    pub roots: Vec<String>,
    pub subdomains: BTreeSet<String>,
    pub ranges: BTreeSet<(String, String)>,
    pub scans: BTreeMap<Tool, Vec<ToolScan>>,
}

impl Inputs {
    fn scans(&self, tool: Tool) -> &[ToolScan] {
        self.scans.get(&tool).map(Vec::as_slice).unwrap_or_default()
    }
}

pub(crate) struct Folded {
    pub details: AssetDetails,
    pub observed_at: OffsetDateTime,
    /// Latest contributing scan per tool.
    pub sources: BTreeMap<Tool, (OffsetDateTime, Uuid)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MetaValue {
    pub value: Option<String>,
    pub json: Option<Value>,
}

#[derive(Default)]
pub(crate) struct Collected {
    pub assets: BTreeMap<AssetKey, Folded>,
    /// `(fqdn, record_type, value) -> ttl`
    pub dns: BTreeMap<(String, String, String), Option<i64>>,
    /// `(asset, metadata_type, key) -> value`
    pub metadata: BTreeMap<(AssetKey, String, String), MetaValue>,
    pub skipped_rows: usize,
}

impl Collected {
    pub fn add(&mut self, details: AssetDetails, scan: &ToolScan) {
        let key = (details.asset_type(), details.identifier().to_string());
        let at = scan.created_at;
        match self.assets.entry(key) {
            Entry::Vacant(e) => {
                e.insert(Folded { details, observed_at: at, sources: BTreeMap::from([(scan.tool, (at, scan.scan_id))]) });
            }
            Entry::Occupied(mut e) => {
                let folded = e.get_mut();
                folded.details.merge(details, at >= folded.observed_at);
                folded.observed_at = folded.observed_at.max(at);
                let seen = folded.sources.entry(scan.tool).or_insert((at, scan.scan_id));
                if at >= seen.0 {
                    *seen = (at, scan.scan_id);
                }
            }
        }
    }

    fn has(&self, asset_type: AssetType, identifier: &str) -> bool {
        self.assets.contains_key(&(asset_type, identifier.to_string()))
    }

    fn meta(&mut self, asset: AssetKey, metadata_type: &str, key: &str, value: MetaValue) {
        self.metadata.insert((asset, metadata_type.to_string(), key.to_string()), value);
    }

    fn skip(&mut self, scan: &ToolScan, err: &anyhow::Error) {
        warn!(tool = %scan.tool, scan_id = %scan.scan_id, error = %err, "skipping malformed scan row");
        self.skipped_rows += 1;
    }

    /// `source/<tool>` rows for every folded asset.
    fn source_metadata(&mut self) {
        let rows: Vec<(AssetKey, Tool, Uuid)> = self
            .assets
            .iter()
            .flat_map(|(key, f)| f.sources.iter().map(move |(tool, (_, scan_id))| (key.clone(), *tool, *scan_id)))
            .collect();
        for (key, tool, scan_id) in rows {
            self.meta(key, "source", tool.as_str(), MetaValue { value: Some(scan_id.to_string()), json: None });
        }
    }
}

pub(crate) fn subnet_size(net: &IpNet) -> Option<u64> {
    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    1u64.checked_shl(host_bits)
}

fn ip_details(ip: IpAddr) -> IpAddressDetails {
    IpAddressDetails {
        ip_address: ip.to_string(),
        ip_type: Some(if ip.is_ipv4() { "ipv4" } else { "ipv6" }.to_string()),
        ..Default::default()
    }
}

fn trim_dot(s: &str) -> String {
    s.trim().trim_end_matches('.').to_string()
}

fn add_web_server(out: &mut Collected, line: &HttpxLine, scan: &ToolScan) {
    let Some((web, ips)) = line.web_server() else {
        return;
    };
    let url = web.url.clone();
    for ip in ips {
        out.add(AssetDetails::IpAddress(ip_details(ip)), scan);
    }
    out.add(AssetDetails::LiveWebServer(web), scan);
    if let Some(hash) = line.favicon_hash() {
        out.meta((AssetType::LiveWebServer, url), "favicon", "mmh3", MetaValue { value: Some(hash), json: None });
    }
}

fn intel(out: &mut Collected, inputs: &Inputs) {
    for tool in Tool::NETWORK_INTEL_SOURCES {
        for scan in inputs.scans(tool) {
            let report = match sources::intel_report(scan) {
                Ok(r) => r,
                Err(err) => {
                    out.skip(scan, &err);
                    continue;
                }
            };
            for asn in &report.asns {
                let Some(number) = value_string(&asn.asn).and_then(|a| normalize_asn(&a)) else {
                    continue;
                };
                let details = AsnDetails {
                    asn_number: number,
                    organization: asn.organization.clone(),
                    description: asn.description.clone(),
                    country: asn.country.clone(),
                };
                out.add(AssetDetails::Asn(details), scan);
            }
            for range in &report.network_ranges {
                let Some(net) = canonical_cidr(&range.cidr) else {
                    continue;
                };
                let cidr = net.to_string();
                if !inputs.ranges.contains(&(cidr.clone(), tool.as_str().to_string())) {
                    continue;
                }
                let details = NetworkRangeDetails {
                    cidr_block: cidr,
                    subnet_size: subnet_size(&net),
                    asn: value_string(&range.asn).and_then(|a| normalize_asn(&a)),
                    organization: range.organization.clone(),
                    description: range.description.clone(),
                    country: range.country.clone(),
                    sources: BTreeSet::from([tool.as_str().to_string()]),
                };
                out.add(AssetDetails::NetworkRange(details), scan);
            }
        }
    }
}

fn port_scans(out: &mut Collected, inputs: &Inputs) {
    for scan in inputs.scans(Tool::IpPortScan) {
        let report = match sources::port_scan_report(scan) {
            Ok(r) => r,
            Err(err) => {
                out.skip(scan, &err);
                continue;
            }
        };
        for live in &report.live_ips {
            let Ok(ip) = live.ip.trim().parse::<IpAddr>() else {
                continue;
            };
            let mut details = ip_details(ip);
            details.asn = value_string(&live.asn).and_then(|a| normalize_asn(&a));
            details.organization = live.organization.clone();
            details.country = live.country.clone();
            details.hostnames.extend(live.hostname.as_deref().and_then(normalize_name));
            details.ptr_records.extend(live.ptr.as_deref().map(trim_dot).filter(|p| !p.is_empty()));
            out.add(AssetDetails::IpAddress(details), scan);
        }
        for line in &report.web_servers {
            add_web_server(out, line, scan);
        }
    }
}

fn web(out: &mut Collected, inputs: &Inputs) {
    for scan in inputs.scans(Tool::Httpx) {
        match sources::httpx_lines(scan) {
            Ok(lines) => lines.iter().for_each(|line| add_web_server(out, line, scan)),
            Err(err) => out.skip(scan, &err),
        }
    }
    // enrichment only: neither source creates servers
    for scan in inputs.scans(Tool::NucleiScreenshot) {
        match sources::screenshot_lines(scan) {
            Ok(lines) => {
                for line in lines {
                    let Some(url) = canonical_url(&line.url) else { continue };
                    if !out.has(AssetType::LiveWebServer, &url) {
                        continue;
                    }
                    let details =
                        LiveWebServerDetails { url, screenshot_path: Some(line.screenshot_path), ..Default::default() };
                    out.add(AssetDetails::LiveWebServer(details), scan);
                }
            }
            Err(err) => out.skip(scan, &err),
        }
    }
    for scan in inputs.scans(Tool::Metadata) {
        match sources::metadata_lines(scan) {
            Ok(lines) => {
                for line in lines {
                    let Some(url) = canonical_url(&line.url) else { continue };
                    if !out.has(AssetType::LiveWebServer, &url) {
                        continue;
                    }
                    for (key, value) in line.findings {
                        let meta = MetaValue { value: value_string(&value), json: Some(value) };
                        out.meta((AssetType::LiveWebServer, url.clone()), "finding", &key, meta);
                    }
                }
            }
            Err(err) => out.skip(scan, &err),
        }
    }
}

fn cloud(out: &mut Collected, inputs: &Inputs) {
    for scan in inputs.scans(Tool::CloudEnum) {
        match sources::cloud_lines(scan) {
            Ok(lines) => {
                for line in lines {
                    let url = canonical_url(&line.url).unwrap_or_else(|| line.url.trim().to_string());
                    if url.is_empty() {
                        continue;
                    }
                    let details = CloudAssetDetails {
                        url,
                        provider: line.provider,
                        service_type: line.service_type,
                        region: line.region,
                        domain: line.domain.as_deref().and_then(normalize_name),
                    };
                    out.add(AssetDetails::CloudAsset(details), scan);
                }
            }
            Err(err) => out.skip(scan, &err),
        }
    }
}

fn fqdn(name: String) -> FqdnDetails {
    FqdnDetails { root_domain: registrable_domain(&name), fqdn: name, ..Default::default() }
}

fn fqdns(out: &mut Collected, inputs: &Inputs) {
    for tool in Tool::SUBDOMAIN_SOURCES {
        for scan in inputs.scans(tool) {
            match sources::subdomain_names(scan) {
                Ok(names) => {
                    for name in names.into_iter().filter(|n| inputs.subdomains.contains(n)) {
                        out.add(AssetDetails::Fqdn(fqdn(name)), scan);
                    }
                }
                Err(err) => out.skip(scan, &err),
            }
        }
    }

    for scan in inputs.scans(Tool::Dnsx) {
        let lines = match sources::dns_lines(scan) {
            Ok(lines) => lines,
            Err(err) => {
                out.skip(scan, &err);
                continue;
            }
        };
        for line in lines {
            let Some(host) = normalize_name(&line.host).filter(|h| within(&inputs.roots, h)) else {
                continue;
            };
            let record_type = line.record_type.trim().to_ascii_uppercase();
            let value = trim_dot(&line.value);
            if value.is_empty() {
                continue;
            }
            let mut details = fqdn(host.clone());
            details.last_dns_scan = Some(scan.created_at);
            match record_type.as_str() {
                "A" | "AAAA" => {
                    let Ok(ip) = value.parse::<IpAddr>() else { continue };
                    if record_type == "A" {
                        details.a_records.insert(value.clone());
                    } else {
                        details.aaaa_records.insert(value.clone());
                    }
                    details.resolved_ips.insert(ip.to_string());
                    out.add(AssetDetails::IpAddress(ip_details(ip)), scan);
                }
                "CNAME" => {
                    details.cname_records.insert(value.to_ascii_lowercase());
                }
                "MX" => {
                    details.mx_records.insert(value.to_ascii_lowercase());
                }
                "TXT" => {
                    details.txt_records.insert(value.clone());
                }
                "NS" => {
                    details.ns_records.insert(value.to_ascii_lowercase());
                }
                _ => {}
            }
            out.add(AssetDetails::Fqdn(details), scan);
            let ttl = out.dns.entry((host, record_type, value)).or_insert(None);
            if line.ttl.is_some() {
                *ttl = line.ttl;
            }
        }
    }

    for scan in inputs.scans(Tool::Whois) {
        match sources::whois_lines(scan) {
            Ok(lines) => {
                for line in lines {
                    let Some(host) = normalize_name(&line.domain).filter(|h| within(&inputs.roots, h)) else {
                        continue;
                    };
                    let mut details = fqdn(host);
                    details.registrar = line.registrar;
                    details.creation_date = line.creation_date;
                    details.expiration_date = line.expiration_date;
                    details.name_servers = line.name_servers.iter().map(|n| trim_dot(n).to_ascii_lowercase()).collect();
                    details.status = line.status.into_iter().collect();
                    details.last_whois_scan = Some(scan.created_at);
                    out.add(AssetDetails::Fqdn(details), scan);
                }
            }
            Err(err) => out.skip(scan, &err),
        }
    }

    for scan in inputs.scans(Tool::SslScan) {
        match sources::ssl_lines(scan) {
            Ok(lines) => {
                for line in lines {
                    let Some(host) = normalize_name(&line.host).filter(|h| within(&inputs.roots, h)) else {
                        continue;
                    };
                    let mut details = fqdn(host);
                    details.ssl_issuer = line.issuer;
                    details.ssl_subject = line.subject;
                    details.ssl_expiry = line.not_after;
                    details.ssl_protocols = line.protocols.into_iter().collect();
                    details.last_ssl_scan = Some(scan.created_at);
                    out.add(AssetDetails::Fqdn(details), scan);
                }
            }
            Err(err) => out.skip(scan, &err),
        }
    }
}

pub(crate) fn collect(inputs: &Inputs) -> Collected {
    let mut out = Collected::default();
    intel(&mut out, inputs);
    port_scans(&mut out, inputs);
    web(&mut out, inputs);
    cloud(&mut out, inputs);
    fqdns(&mut out, inputs);
    out.source_metadata();
    out
}
