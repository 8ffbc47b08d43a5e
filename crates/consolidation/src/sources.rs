//! Parsers for the canonical result payloads tool runners store in their scan rows.
//!
//! Every parser works on one row and fails as a whole only when nothing in it is usable;
//! the engine then skips that row and carries on with the rest.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use reconflow_core::names::{canonical_url, normalize_name, url_host};
use reconflow_core::{LiveWebServerDetails, Tool, ToolScan};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::net::IpAddr;

static ANSI_ESCAPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi escape regex should compile"));

fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE_REGEX.replace_all(text, "")
}

fn result_text(scan: &ToolScan) -> &str {
    scan.result.as_deref().unwrap_or("")
}

/// JSON-lines payload. Bad lines are dropped; a payload with no good line is an error.
pub fn json_lines<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut bad = 0usize;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str(line) {
            Ok(v) => out.push(v),
            Err(_) => bad += 1,
        }
    }
    if out.is_empty() && bad > 0 {
        bail!("no parseable lines ({bad} malformed)");
    }
    Ok(out)
}

/// String or number, as tools disagree on how to encode ports, ASNs and hashes.
pub fn value_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct UrlLine {
    url: String,
}

/// Host names found by a subdomain discovery tool, normalized but not yet scope-filtered.
pub fn subdomain_names(scan: &ToolScan) -> Result<BTreeSet<String>> {
    let text = result_text(scan);
    if scan.tool == Tool::Gau {
        let lines: Vec<UrlLine> = json_lines(text)?;
        return Ok(lines.iter().filter_map(|l| url_host(&l.url)).filter_map(|h| normalize_name(&h)).collect());
    }
    let clean = strip_ansi(text);
    Ok(clean
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|tok| !tok.is_empty())
        .filter_map(normalize_name)
        .collect())
}

/// Domains reported by a company-domain source.
pub fn company_domains(scan: &ToolScan) -> Result<BTreeSet<String>> {
    let clean = strip_ansi(result_text(scan));
    Ok(clean.lines().filter_map(normalize_name).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntelAsn {
    pub asn: Value,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntelRange {
    pub cidr: String,
    #[serde(default)]
    pub asn: Value,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
    pub scan_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntelReport {
    #[serde(default)]
    pub asns: Vec<IntelAsn>,
    #[serde(default)]
    pub network_ranges: Vec<IntelRange>,
}

pub fn intel_report(scan: &ToolScan) -> Result<IntelReport> {
    let text = result_text(scan).trim();
    if text.is_empty() {
        return Ok(IntelReport::default());
    }
    Ok(serde_json::from_str(text)?)
}

/// One line of `httpx -json` style output. `ip_port_scan` reuses the shape for its web servers.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpxLine {
    pub url: String,
    pub input: Option<String>,
    pub host: Option<String>,
    #[serde(default)]
    pub a: Vec<String>,
    #[serde(default)]
    pub port: Value,
    pub scheme: Option<String>,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub webserver: Option<String>,
    #[serde(default)]
    pub tech: Vec<String>,
    pub content_length: Option<u64>,
    #[serde(default)]
    pub favicon: Value,
}

impl HttpxLine {
    /// Web server payload keyed by canonical URL, plus every IP the line reports.
    pub fn web_server(&self) -> Option<(LiveWebServerDetails, Vec<IpAddr>)> {
        let url = canonical_url(&self.url)?;
        let parsed = url::Url::parse(&url).ok()?;
        let host = url_host(&url)?;
        let mut ips: Vec<IpAddr> = self
            .host
            .iter()
            .chain(self.a.iter())
            .filter_map(|s| s.trim().parse::<IpAddr>().ok())
            .collect();
        if let Ok(ip) = host.parse::<IpAddr>() {
            ips.push(ip);
        }
        ips.sort();
        ips.dedup();
        let domain = if host.parse::<IpAddr>().is_ok() { None } else { Some(host) };
        let port = value_string(&self.port).and_then(|p| p.parse().ok()).or_else(|| parsed.port_or_known_default());
        let details = LiveWebServerDetails {
            url,
            domain,
            ip_addresses: ips.iter().map(|ip| ip.to_string()).collect(),
            port,
            protocol: Some(parsed.scheme().to_string()),
            status_code: self.status_code,
            title: non_empty(self.title.clone()),
            web_server: non_empty(self.webserver.clone()),
            technologies: self.tech.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
            content_length: self.content_length,
            screenshot_path: None,
        };
        Some((details, ips))
    }

    pub fn favicon_hash(&self) -> Option<String> {
        value_string(&self.favicon)
    }
}

pub fn httpx_lines(scan: &ToolScan) -> Result<Vec<HttpxLine>> {
    json_lines(result_text(scan))
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveIp {
    pub ip: String,
    pub hostname: Option<String>,
    pub ptr: Option<String>,
    #[serde(default)]
    pub asn: Value,
    pub organization: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortScanReport {
    #[serde(default)]
    pub live_ips: Vec<LiveIp>,
    #[serde(default)]
    pub web_servers: Vec<HttpxLine>,
}

pub fn port_scan_report(scan: &ToolScan) -> Result<PortScanReport> {
    let text = result_text(scan).trim();
    if text.is_empty() {
        return Ok(PortScanReport::default());
    }
    Ok(serde_json::from_str(text)?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudLine {
    pub url: String,
    pub provider: Option<String>,
    pub service_type: Option<String>,
    pub region: Option<String>,
    pub domain: Option<String>,
}

pub fn cloud_lines(scan: &ToolScan) -> Result<Vec<CloudLine>> {
    json_lines(result_text(scan))
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsLine {
    pub host: String,
    pub record_type: String,
    pub value: String,
    pub ttl: Option<i64>,
}

pub fn dns_lines(scan: &ToolScan) -> Result<Vec<DnsLine>> {
    json_lines(result_text(scan))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoisLine {
    pub domain: String,
    pub registrar: Option<String>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub status: Vec<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
}

pub fn whois_lines(scan: &ToolScan) -> Result<Vec<WhoisLine>> {
    json_lines(result_text(scan))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SslLine {
    pub host: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub not_after: Option<String>,
    #[serde(default)]
    pub protocols: Vec<String>,
}

pub fn ssl_lines(scan: &ToolScan) -> Result<Vec<SslLine>> {
    json_lines(result_text(scan))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotLine {
    pub url: String,
    pub screenshot_path: String,
}

pub fn screenshot_lines(scan: &ToolScan) -> Result<Vec<ScreenshotLine>> {
    json_lines(result_text(scan))
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataLine {
    pub url: String,
    #[serde(default)]
    pub findings: Map<String, Value>,
}

pub fn metadata_lines(scan: &ToolScan) -> Result<Vec<MetadataLine>> {
    json_lines(result_text(scan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scan(tool: Tool, result: &str) -> ToolScan {
        let mut s = ToolScan::new(tool, Uuid::nil(), None);
        s.result = Some(result.to_string());
        s
    }

    #[test]
    fn plain_lists_tolerate_noise() {
        let s = scan(Tool::Subfinder, "\x1b[32mA.example.com\x1b[0m\nhttps://b.example.com/path, c.example.com:8080\n\n");
        let names: Vec<String> = subdomain_names(&s).unwrap().into_iter().collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com", "c.example.com"]);
    }

    #[test]
    fn gau_takes_hosts_from_url_lines() {
        let s = scan(Tool::Gau, "{\"url\":\"https://api.example.com/v1?q=1\"}\nnot json\n{\"url\":\"http://API.example.com:81/x\"}");
        let names: Vec<String> = subdomain_names(&s).unwrap().into_iter().collect();
        assert_eq!(names, vec!["api.example.com"]);
    }

    #[test]
    fn json_lines_rejects_wholly_malformed_payloads() {
        assert!(subdomain_names(&scan(Tool::Gau, "garbage\nmore garbage")).is_err());
        assert!(json_lines::<UrlLine>("").unwrap().is_empty());
    }

    #[test]
    fn httpx_line_becomes_a_canonical_server() {
        let line: HttpxLine = serde_json::from_str(
            r#"{"url":"https://www.example.com:443/login","host":"192.0.2.10","a":["192.0.2.11"],"port":"443","status_code":200,"title":"Login","webserver":"nginx","tech":["Nginx","PHP"],"favicon":"-1234"}"#,
        )
        .unwrap();
        let (web, ips) = line.web_server().unwrap();
        assert_eq!(web.url, "https://www.example.com");
        assert_eq!(web.domain.as_deref(), Some("www.example.com"));
        assert_eq!(web.port, Some(443));
        assert_eq!(web.ip_addresses, ["192.0.2.10", "192.0.2.11"].map(String::from).into());
        assert_eq!(ips.len(), 2);
        assert_eq!(line.favicon_hash().as_deref(), Some("-1234"));
    }

    #[test]
    fn intel_report_parses_numeric_and_string_asns() {
        let s = scan(
            Tool::AmassIntel,
            r#"{"asns":[{"asn":13335,"organization":"Cloudflare"}],"network_ranges":[{"cidr":"104.16.0.0/13","asn":"AS13335"}]}"#,
        );
        let report = intel_report(&s).unwrap();
        assert_eq!(value_string(&report.asns[0].asn).as_deref(), Some("13335"));
        assert_eq!(value_string(&report.network_ranges[0].asn).as_deref(), Some("AS13335"));
        assert!(intel_report(&scan(Tool::AmassIntel, "{oops")).is_err());
    }
}
