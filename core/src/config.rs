use serde::{Deserialize, Serialize};

use crate::Step;

pub const DEFAULT_MAX_CONSOLIDATED_SUBDOMAINS: u64 = 2500;
pub const DEFAULT_MAX_LIVE_WEB_SERVERS: u64 = 500;

/// Step switches plus the two early-stop thresholds. A threshold of 0 disables it.
///
/// Missing fields take their defaults, so an absent or partial config means
/// "everything enabled".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoScanConfig {
    pub amass: bool,
    pub sublist3r: bool,
    pub assetfinder: bool,
    pub gau: bool,
    pub ctl: bool,
    pub subfinder: bool,
    pub consolidate_httpx_round1: bool,
    pub shuffledns: bool,
    pub cewl: bool,
    pub consolidate_httpx_round2: bool,
    pub gospider: bool,
    pub subdomainizer: bool,
    pub consolidate_httpx_round3: bool,
    pub nuclei_screenshot: bool,
    pub metadata: bool,
    #[serde(alias = "maxConsolidatedSubdomains")]
    pub max_consolidated_subdomains: u64,
    #[serde(alias = "maxLiveWebServers")]
    pub max_live_web_servers: u64,
}

impl Default for AutoScanConfig {
    fn default() -> Self {
        AutoScanConfig {
            amass: true,
            sublist3r: true,
            assetfinder: true,
            gau: true,
            ctl: true,
            subfinder: true,
            consolidate_httpx_round1: true,
            shuffledns: true,
            cewl: true,
            consolidate_httpx_round2: true,
            gospider: true,
            subdomainizer: true,
            consolidate_httpx_round3: true,
            nuclei_screenshot: true,
            metadata: true,
            max_consolidated_subdomains: DEFAULT_MAX_CONSOLIDATED_SUBDOMAINS,
            max_live_web_servers: DEFAULT_MAX_LIVE_WEB_SERVERS,
        }
    }
}

impl AutoScanConfig {
    pub fn is_enabled(&self, step: Step) -> bool {
        match step {
            Step::Amass => self.amass,
            Step::Sublist3r => self.sublist3r,
            Step::Assetfinder => self.assetfinder,
            Step::Gau => self.gau,
            Step::Ctl => self.ctl,
            Step::Subfinder => self.subfinder,
            Step::ConsolidateHttpxRound1 => self.consolidate_httpx_round1,
            Step::Shuffledns => self.shuffledns,
            Step::Cewl => self.cewl,
            Step::ConsolidateHttpxRound2 => self.consolidate_httpx_round2,
            Step::Gospider => self.gospider,
            Step::Subdomainizer => self.subdomainizer,
            Step::ConsolidateHttpxRound3 => self.consolidate_httpx_round3,
            Step::NucleiScreenshot => self.nuclei_screenshot,
            Step::Metadata => self.metadata,
        }
    }

    /// Builder-style toggle, mostly for tests and CLI overrides.
    pub fn with_step(mut self, step: Step, enabled: bool) -> Self {
        let slot = match step {
            Step::Amass => &mut self.amass,
            Step::Sublist3r => &mut self.sublist3r,
            Step::Assetfinder => &mut self.assetfinder,
            Step::Gau => &mut self.gau,
            Step::Ctl => &mut self.ctl,
            Step::Subfinder => &mut self.subfinder,
            Step::ConsolidateHttpxRound1 => &mut self.consolidate_httpx_round1,
            Step::Shuffledns => &mut self.shuffledns,
            Step::Cewl => &mut self.cewl,
            Step::ConsolidateHttpxRound2 => &mut self.consolidate_httpx_round2,
            Step::Gospider => &mut self.gospider,
            Step::Subdomainizer => &mut self.subdomainizer,
            Step::ConsolidateHttpxRound3 => &mut self.consolidate_httpx_round3,
            Step::NucleiScreenshot => &mut self.nuclei_screenshot,
            Step::Metadata => &mut self.metadata,
        };
        *slot = enabled;
        self
    }

    pub fn subdomain_limit_exceeded(&self, count: u64) -> bool {
        self.max_consolidated_subdomains > 0 && count > self.max_consolidated_subdomains
    }

    pub fn live_web_server_limit_exceeded(&self, count: u64) -> bool {
        self.max_live_web_servers > 0 && count > self.max_live_web_servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_everything() {
        let cfg = AutoScanConfig::default();
        assert!(Step::ALL.iter().all(|s| cfg.is_enabled(*s)));
        assert_eq!(cfg.max_consolidated_subdomains, 2500);
        assert_eq!(cfg.max_live_web_servers, 500);
    }

    #[test]
    fn partial_json_keeps_defaults_and_accepts_camel_case_limits() {
        let cfg: AutoScanConfig =
            serde_json::from_str(r#"{"gau": false, "maxConsolidatedSubdomains": 10}"#).unwrap();
        assert!(!cfg.is_enabled(Step::Gau));
        assert!(cfg.is_enabled(Step::Amass));
        assert_eq!(cfg.max_consolidated_subdomains, 10);
        assert_eq!(cfg.max_live_web_servers, 500);
    }

    #[test]
    fn limits_are_strict_and_zero_disables() {
        let cfg = AutoScanConfig { max_consolidated_subdomains: 5, max_live_web_servers: 0, ..Default::default() };
        assert!(!cfg.subdomain_limit_exceeded(5));
        assert!(cfg.subdomain_limit_exceeded(6));
        assert!(!cfg.live_web_server_limit_exceeded(1_000_000));
    }

    #[test]
    fn with_step_toggles_one_switch() {
        let cfg = AutoScanConfig::default().with_step(Step::Cewl, false);
        assert!(!cfg.is_enabled(Step::Cewl));
        assert_eq!(Step::ALL.iter().filter(|s| cfg.is_enabled(**s)).count(), 14);
    }
}
