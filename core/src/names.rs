//! Name, URL and ASN normalization used when folding tool output into consolidated sets.

use url::Url;

/// Second-level labels that act as public suffixes, so `a.b.co.uk` roots at `b.co.uk`.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "ltd.uk", "com.au", "net.au", "org.au", "co.nz", "co.jp",
    "com.br", "co.in", "co.za", "com.mx", "com.cn",
];

/// Lowercases and strips scheme, userinfo, port, path, trailing dot and a leading wildcard label.
/// Returns `None` for anything that is not a plausible DNS name.
pub fn normalize_name(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_ascii_lowercase();
    if let Some(idx) = s.find("://") {
        s.replace_range(..idx + 3, "");
    }
    if let Some(idx) = s.find(['/', '?', '#']) {
        s.truncate(idx);
    }
    if let Some(idx) = s.rfind('@') {
        s.replace_range(..=idx, "");
    }
    if let Some(idx) = s.rfind(':') {
        if s[idx + 1..].chars().all(|c| c.is_ascii_digit()) {
            s.truncate(idx);
        }
    }
    let s = s.trim_end_matches('.').trim_start_matches("*.");
    if s.is_empty() || s.split('.').any(str::is_empty) {
        return None;
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) {
        return None;
    }
    Some(s.to_string())
}

/// True when `name` is `root` itself or one of its subdomains.
pub fn in_scope(name: &str, root: &str) -> bool {
    name == root || (name.len() > root.len() && name.ends_with(root) && name.as_bytes()[name.len() - root.len() - 1] == b'.')
}

/// Registrable domain (one label under the public suffix), e.g. `api.example.com` -> `example.com`.
pub fn registrable_domain(name: &str) -> Option<String> {
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if MULTI_LABEL_SUFFIXES.contains(&last_two.as_str()) { 3 } else { 2 };
    if labels.len() < keep {
        return None;
    }
    Some(labels[labels.len() - keep..].join("."))
}

/// `AS13335`, `as13335` and `13335` all normalize to `13335`. Non-numeric input is rejected.
pub fn normalize_asn(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_prefix("AS").or_else(|| s.strip_prefix("as")).unwrap_or(s).trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits = s.trim_start_matches('0');
    Some(if digits.is_empty() { "0".to_string() } else { digits.to_string() })
}

/// `scheme://host[:port]` with default ports elided. Only http and https are accepted.
pub fn canonical_url(raw: &str) -> Option<String> {
    let url = parse_web_url(raw)?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Host portion of a web URL, lowercased, without brackets for IPv6 literals.
pub fn url_host(raw: &str) -> Option<String> {
    let url = parse_web_url(raw)?;
    url.host_str().map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn parse_web_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    let url = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("http://{trimmed}")).ok()?
    };
    matches!(url.scheme(), "http" | "https").then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_url_noise() {
        assert_eq!(normalize_name("HTTPS://Api.Example.com:8443/v1?x=1").as_deref(), Some("api.example.com"));
        assert_eq!(normalize_name("user@mail.example.com.").as_deref(), Some("mail.example.com"));
        assert_eq!(normalize_name("*.dev.example.com").as_deref(), Some("dev.example.com"));
        assert_eq!(normalize_name("  "), None);
        assert_eq!(normalize_name("bad name.example.com"), None);
        assert_eq!(normalize_name("a..example.com"), None);
    }

    #[test]
    fn scope_requires_a_label_boundary() {
        assert!(in_scope("example.com", "example.com"));
        assert!(in_scope("a.example.com", "example.com"));
        assert!(!in_scope("badexample.com", "example.com"));
        assert!(!in_scope("example.com.evil.net", "example.com"));
    }

    #[test]
    fn registrable_domain_knows_multi_label_suffixes() {
        assert_eq!(registrable_domain("a.b.example.com").as_deref(), Some("example.com"));
        assert_eq!(registrable_domain("shop.example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(registrable_domain("localhost"), None);
    }

    #[test]
    fn asn_normalization() {
        assert_eq!(normalize_asn("AS13335").as_deref(), Some("13335"));
        assert_eq!(normalize_asn(" as 15169").as_deref(), Some("15169"));
        assert_eq!(normalize_asn("0042").as_deref(), Some("42"));
        assert_eq!(normalize_asn("ASN-X"), None);
        assert_eq!(normalize_asn(""), None);
    }

    #[test]
    fn canonical_url_elides_default_ports() {
        assert_eq!(canonical_url("https://Example.com:443/").as_deref(), Some("https://example.com"));
        assert_eq!(canonical_url("http://example.com:8080/admin").as_deref(), Some("http://example.com:8080"));
        assert_eq!(canonical_url("example.com").as_deref(), Some("http://example.com"));
        assert_eq!(canonical_url("ftp://example.com"), None);
        assert_eq!(url_host("https://[::1]:8443").as_deref(), Some("::1"));
    }
}
