//! Concurrent HTTP(S) probe. Produces httpx-shaped results for the live-host checkpoints.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header::HeaderMap, redirect::Policy, Client, Response};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

const MAX_BODY: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct WebProbeOptions {
    pub timeout_ms: u64,
    pub redirects: usize,
    pub user_agent: String,
    /// Fetch `/favicon.ico` and hash it.
    pub favicon: bool,
}

impl Default for WebProbeOptions {
    fn default() -> Self {
        WebProbeOptions {
            timeout_ms: 1500,
            redirects: 3,
            user_agent: concat!("reconflow/", env!("CARGO_PKG_VERSION")).to_string(),
            favicon: true,
        }
    }
}

/// One probed endpoint. Serializes to a single httpx JSON line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebResult {
    pub input: String,
    pub url: String,
    pub scheme: String,
    pub port: u16,
    /// Remote address the response came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webserver: Option<String>,
    pub tech: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(skip)]
    pub error: Option<String>,
}

impl WebResult {
    pub fn is_live(&self) -> bool {
        self.status_code.is_some()
    }

    fn unreachable(input: String, scheme: &str, port: u16, error: String) -> Self {
        WebResult {
            url: format!("{scheme}://{input}:{port}"),
            input,
            scheme: scheme.to_string(),
            port,
            error: Some(error),
            ..Default::default()
        }
    }
}

pub fn build_client(opts: &WebProbeOptions) -> Result<Client> {
    let client = Client::builder()
        .redirect(Policy::limited(opts.redirects))
        .timeout(Duration::from_millis(opts.timeout_ms))
        .user_agent(opts.user_agent.clone())
        .danger_accept_invalid_certs(true)
        .brotli(true)
        .gzip(true)
        .deflate(true)
        .build()?;
    Ok(client)
}

/// Probes every target on every port, at most `concurrency` requests in flight.
/// Unreachable endpoints are returned too, with `error` set.
pub async fn probe_many(targets: &[String], ports: &[u16], opts: &WebProbeOptions, concurrency: usize) -> Result<Vec<WebResult>> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let client = build_client(opts)?;

    let mut handles = Vec::with_capacity(targets.len() * ports.len());
    for t in targets {
        for &p in ports {
            let permit = sem.clone().acquire_owned().await?;
            let client = client.clone();
            let host = t.clone();
            let favicon = opts.favicon;
            handles.push(tokio::spawn(async move {
                let r = probe_one(&client, host, p, favicon).await;
                drop(permit);
                r
            }));
        }
    }
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        match h.await {
            Ok(r) => out.push(r),
            Err(err) => debug!(error = %err, "probe task ended abnormally"),
        }
    }
    Ok(out)
}

/// httpx JSON lines for the live results only.
pub fn to_json_lines(results: &[WebResult]) -> Result<String> {
    let mut lines = Vec::new();
    for r in results.iter().filter(|r| r.is_live()) {
        lines.push(serde_json::to_string(r)?);
    }
    Ok(lines.join("\n"))
}

fn schemes_for(port: u16) -> &'static [&'static str] {
    match port {
        443 | 8443 | 9443 => &["https"],
        80 | 8080 | 8000 => &["http"],
        _ => &["https", "http"],
    }
}

async fn probe_one(client: &Client, host: String, port: u16, favicon: bool) -> WebResult {
    let mut last_error = String::from("unreachable");
    for scheme in schemes_for(port) {
        let url = format!("{scheme}://{host}:{port}");
        match fetch_page(client, &url).await {
            Ok(mut page) => {
                page.input = host;
                page.scheme = scheme.to_string();
                page.port = port;
                if favicon {
                    page.favicon = fetch_favicon(client, &page.url).await;
                }
                return page;
            }
            Err(e) => {
                debug!(%url, error = %e, "probe failed");
                last_error = e.to_string();
            }
        }
    }
    let scheme = schemes_for(port).last().copied().unwrap_or("http");
    WebResult::unreachable(host, scheme, port, last_error)
}

async fn fetch_page(client: &Client, url: &str) -> Result<WebResult> {
    let resp = client.get(url).send().await?;
    let status = resp.status().as_u16();
    let final_url = resp.url().to_string();
    let remote = resp.remote_addr().map(|a| a.ip().to_string());
    let headers = resp.headers().clone();
    let server = headers.get(reqwest::header::SERVER).and_then(|v| v.to_str().ok()).map(str::to_string);
    let ct_is_html = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("text/html"))
        .unwrap_or(false);
    let bytes = resp.bytes().await?;

    let (title, tech) = if bytes.len() > MAX_BODY {
        (None, fingerprint(&headers, None, ""))
    } else {
        let body = String::from_utf8_lossy(&bytes);
        let title = if ct_is_html || body.to_ascii_lowercase().contains("<html") { extract_title(&body) } else { None };
        let tech = fingerprint(&headers, title.as_deref(), &body);
        (title, tech)
    };

    Ok(WebResult {
        url: final_url,
        host: remote,
        status_code: Some(status),
        title,
        webserver: server,
        tech,
        content_length: Some(bytes.len() as u64),
        ..Default::default()
    })
}

async fn fetch_favicon(client: &Client, page_url: &str) -> Option<String> {
    let icon = Url::parse(page_url).ok()?.join("/favicon.ico").ok()?;
    let resp: Response = client.get(icon).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let bytes = resp.bytes().await.ok()?;
    if bytes.is_empty() {
        return None;
    }
    favicon_hash(&bytes).ok().map(|h| h.to_string())
}

/// Shodan-style favicon hash: MurmurHash3 (x86, 32-bit, seed 0) over the MIME base64
/// encoding, newline after every 76 characters and at the end, read as a signed integer.
pub fn favicon_hash(bytes: &[u8]) -> std::io::Result<i32> {
    let wrapped = base64_lines(bytes);
    let h = murmur3::murmur3_32(&mut Cursor::new(wrapped), 0)?;
    Ok(h as i32)
}

fn base64_lines(bytes: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(bytes);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for chunk in encoded.as_bytes().chunks(76) {
        out.extend_from_slice(chunk);
        out.push(b'\n');
    }
    out
}

fn extract_title(body: &str) -> Option<String> {
    // ascii lowercasing keeps byte offsets valid for slicing `body`
    let lower = body.to_ascii_lowercase();
    let s = lower.find("<title")?;
    let gt = lower[s..].find('>')? + s + 1;
    let end = lower[gt..].find("</title>")? + gt;
    let t = body[gt..end].trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn fingerprint(headers: &HeaderMap, title: Option<&str>, body: &str) -> Vec<String> {
    let mut tech: Vec<String> = Vec::new();
    let mut add = |name: &str| tech.push(name.to_string());

    if let Some(v) = headers.get(reqwest::header::SERVER).and_then(|v| v.to_str().ok()) {
        let l = v.to_ascii_lowercase();
        if l.contains("nginx") { add("Nginx"); }
        if l.contains("apache") { add("Apache HTTP Server"); }
        if l.contains("iis") { add("IIS"); }
        if l.contains("cloudflare") { add("Cloudflare"); }
        if l.contains("caddy") { add("Caddy"); }
    }
    if let Some(v) = headers.get("x-powered-by").and_then(|v| v.to_str().ok()) {
        let l = v.to_ascii_lowercase();
        if l.contains("php") { add("PHP"); }
        if l.contains("express") { add("Express"); }
        if l.contains("asp.net") { add("ASP.NET"); }
        if l.contains("django") { add("Django"); }
    }
    if headers.get("x-jenkins").is_some() { add("Jenkins"); }
    if headers.get("x-drupal-cache").is_some() { add("Drupal"); }

    if let Some(t) = title.map(str::to_ascii_lowercase) {
        if t.contains("index of /") { add("Directory Listing"); }
        if t.contains("wordpress") { add("WordPress"); }
        if t.contains("grafana") { add("Grafana"); }
        if t.contains("kibana") { add("Kibana"); }
        if t.contains("jenkins") { add("Jenkins"); }
    }
    let bl = body.to_ascii_lowercase();
    if bl.contains("wp-content/") { add("WordPress"); }
    if bl.contains("joomla!") { add("Joomla"); }
    if bl.contains("/sites/default/files") { add("Drupal"); }
    if bl.contains("ng-app") { add("AngularJS"); }
    if bl.contains("react-dom") || bl.contains("data-reactroot") { add("React"); }
    if bl.contains("__next_data__") { add("Next.js"); }
    if bl.contains("window.__nuxt") { add("Nuxt.js"); }
    tech.sort();
    tech.dedup();
    tech
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, SERVER};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn title_survives_mixed_case_and_attributes() {
        let body = "<HTML><head><Title lang=\"en\">  Grafana </TITLE></head></HTML>";
        assert_eq!(extract_title(body).as_deref(), Some("Grafana"));
        assert_eq!(extract_title("<title></title>"), None);
        assert_eq!(extract_title("no markup"), None);
    }

    #[test]
    fn fingerprints_are_sorted_and_unique() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVER, HeaderValue::from_static("nginx/1.25"));
        headers.insert("x-powered-by", HeaderValue::from_static("PHP/8.2"));
        let tech = fingerprint(&headers, Some("WordPress site"), "<link href=/wp-content/x.css>");
        assert_eq!(tech, vec!["Nginx", "PHP", "WordPress"]);
    }

    #[test]
    fn base64_is_wrapped_at_76_columns() {
        let wrapped = base64_lines(&[0u8; 100]);
        let text = String::from_utf8(wrapped).unwrap();
        let lines: Vec<&str> = text.split_terminator('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert!(text.ends_with('\n'));
        assert!(base64_lines(b"").is_empty());
    }

    #[test]
    fn favicon_hash_is_signed_murmur3() {
        assert_eq!(favicon_hash(b"").unwrap(), 0);
        assert_eq!(murmur3::murmur3_32(&mut Cursor::new(b"foo"), 0).unwrap() as i32, -156908512);
    }

    #[test]
    fn only_live_results_become_lines() {
        let live = WebResult {
            input: "www.example.com".into(),
            url: "https://www.example.com/".into(),
            scheme: "https".into(),
            port: 443,
            status_code: Some(200),
            tech: vec!["Nginx".into()],
            ..Default::default()
        };
        let dead = WebResult::unreachable("gone.example.com".into(), "https", 443, "timed out".into());
        let text = to_json_lines(&[live, dead]).unwrap();
        assert_eq!(text.lines().count(), 1);
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["status_code"], 200);
        assert_eq!(v["input"], "www.example.com");
        assert!(v.get("error").is_none());
        assert!(v.get("title").is_none());
    }

    async fn serve_once_per_connection(listener: TcpListener) {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let body = "<html><head><title>Edge</title></head><body>ok</body></html>";
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    }

    #[tokio::test]
    async fn probes_a_local_http_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve_once_per_connection(listener));

        let opts = WebProbeOptions { timeout_ms: 3000, favicon: false, ..Default::default() };
        let results = probe_many(&["127.0.0.1".to_string()], &[port], &opts, 4).await.unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!(r.is_live(), "{:?}", r.error);
        assert_eq!(r.scheme, "http");
        assert_eq!(r.status_code, Some(200));
        assert_eq!(r.title.as_deref(), Some("Edge"));
        assert_eq!(r.webserver.as_deref(), Some("nginx"));
        assert_eq!(r.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(r.tech, vec!["Nginx"]);
    }

    #[tokio::test]
    async fn closed_port_is_reported_not_raised() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let opts = WebProbeOptions { timeout_ms: 1000, favicon: false, ..Default::default() };
        let results = probe_many(&["127.0.0.1".to_string()], &[port], &opts, 1).await.unwrap();
        assert!(!results[0].is_live());
        assert!(results[0].error.is_some());
    }
}
