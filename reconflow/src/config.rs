use anyhow::{Context, Result};
use reconflow_core::Tool;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig { path: PathBuf::from("reconflow.db") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { bind: SocketAddr::from(([127, 0, 0, 1], 8443)) }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info,tower_http=warn".into(), json: false }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub pause_poll_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig { pause_poll_ms: 2000 }
    }
}

impl OrchestratorConfig {
    pub fn options(&self) -> orchestrator::OrchestratorOptions {
        orchestrator::OrchestratorOptions { pause_poll: Duration::from_millis(self.pause_poll_ms.max(1)) }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    pub ports: Vec<u16>,
    pub timeout_ms: u64,
    pub redirects: usize,
    pub concurrency: usize,
    pub user_agent: Option<String>,
    pub favicon: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig { ports: vec![80, 443], timeout_ms: 1500, redirects: 3, concurrency: 100, user_agent: None, favicon: true }
    }
}

impl ProbeConfig {
    pub fn options(&self) -> web_surface::WebProbeOptions {
        let mut opts = web_surface::WebProbeOptions {
            timeout_ms: self.timeout_ms,
            redirects: self.redirects,
            favicon: self.favicon,
            ..Default::default()
        };
        if let Some(ua) = &self.user_agent {
            opts.user_agent = ua.clone();
        }
        opts
    }
}

/// Shell command for one tool. `{target}` is the target's base name and `{input}` a file
/// holding the current candidate names, one per line.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolCommand {
    pub command: String,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
    pub orchestrator: OrchestratorConfig,
    pub probe: ProbeConfig,
    pub tools: HashMap<Tool, ToolCommand>,
}

/// Reads `path`, or `./reconflow.yaml` when present. No file means defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("reconflow.yaml");
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = parse_config("{}").unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("reconflow.db"));
        assert_eq!(cfg.server.bind.to_string(), "127.0.0.1:8443");
        assert_eq!(cfg.probe.ports, vec![80, 443]);
        assert_eq!(cfg.orchestrator.pause_poll_ms, 2000);
        assert!(cfg.tools.is_empty());
    }

    #[test]
    fn tool_commands_are_keyed_by_tool_name() {
        let yaml = r#"
server:
  bind: 0.0.0.0:9000
log:
  json: true
tools:
  subfinder:
    command: "subfinder -silent -d {target}"
  nuclei_screenshot:
    command: "nuclei -l {input} -headless"
"#;
        let cfg = parse_config(yaml).unwrap();
        assert_eq!(cfg.server.bind.port(), 9000);
        assert!(cfg.log.json);
        assert_eq!(cfg.log.level, "info,tower_http=warn");
        assert_eq!(cfg.tools[&Tool::Subfinder].command, "subfinder -silent -d {target}");
        assert!(cfg.tools.contains_key(&Tool::NucleiScreenshot));
    }

    #[test]
    fn unknown_tool_is_rejected() {
        assert!(parse_config("tools:\n  nmap:\n    command: nmap\n").is_err());
    }
}
