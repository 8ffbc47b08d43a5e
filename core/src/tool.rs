use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::ParseError;

/// A tool with its own scan table. Every table has the same row shape ([`ToolScan`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Amass,
    Sublist3r,
    Assetfinder,
    Gau,
    Ctl,
    Subfinder,
    Shuffledns,
    Cewl,
    Gospider,
    Subdomainizer,
    Httpx,
    NucleiScreenshot,
    Metadata,
    CtlCompany,
    SecuritytrailsCompany,
    GoogleDorking,
    ReverseWhois,
    AmassIntel,
    MetabigorCompany,
    CloudEnum,
    IpPortScan,
    Dnsx,
    Whois,
    SslScan,
}

impl Tool {
    pub const ALL: [Tool; 24] = [
        Tool::Amass,
        Tool::Sublist3r,
        Tool::Assetfinder,
        Tool::Gau,
        Tool::Ctl,
        Tool::Subfinder,
        Tool::Shuffledns,
        Tool::Cewl,
        Tool::Gospider,
        Tool::Subdomainizer,
        Tool::Httpx,
        Tool::NucleiScreenshot,
        Tool::Metadata,
        Tool::CtlCompany,
        Tool::SecuritytrailsCompany,
        Tool::GoogleDorking,
        Tool::ReverseWhois,
        Tool::AmassIntel,
        Tool::MetabigorCompany,
        Tool::CloudEnum,
        Tool::IpPortScan,
        Tool::Dnsx,
        Tool::Whois,
        Tool::SslScan,
    ];

    /// Tools whose result is a list of discovered host names.
    pub const SUBDOMAIN_SOURCES: [Tool; 10] = [
        Tool::Amass,
        Tool::Sublist3r,
        Tool::Assetfinder,
        Tool::Gau,
        Tool::Ctl,
        Tool::Subfinder,
        Tool::Shuffledns,
        Tool::Cewl,
        Tool::Gospider,
        Tool::Subdomainizer,
    ];

    /// Listed in source precedence order.
    pub const COMPANY_DOMAIN_SOURCES: [Tool; 4] =
        [Tool::GoogleDorking, Tool::ReverseWhois, Tool::CtlCompany, Tool::SecuritytrailsCompany];

    pub const NETWORK_INTEL_SOURCES: [Tool; 2] = [Tool::AmassIntel, Tool::MetabigorCompany];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Amass => "amass",
            Tool::Sublist3r => "sublist3r",
            Tool::Assetfinder => "assetfinder",
            Tool::Gau => "gau",
            Tool::Ctl => "ctl",
            Tool::Subfinder => "subfinder",
            Tool::Shuffledns => "shuffledns",
            Tool::Cewl => "cewl",
            Tool::Gospider => "gospider",
            Tool::Subdomainizer => "subdomainizer",
            Tool::Httpx => "httpx",
            Tool::NucleiScreenshot => "nuclei_screenshot",
            Tool::Metadata => "metadata",
            Tool::CtlCompany => "ctl_company",
            Tool::SecuritytrailsCompany => "securitytrails_company",
            Tool::GoogleDorking => "google_dorking",
            Tool::ReverseWhois => "reverse_whois",
            Tool::AmassIntel => "amass_intel",
            Tool::MetabigorCompany => "metabigor_company",
            Tool::CloudEnum => "cloud_enum",
            Tool::IpPortScan => "ip_port_scan",
            Tool::Dnsx => "dnsx",
            Tool::Whois => "whois",
            Tool::SslScan => "ssl_scan",
        }
    }

    /// Name of the scan table. Only ever built from the fixed variant list, never from input.
    pub fn table(&self) -> String {
        format!("{}_scans", self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL.into_iter().find(|tool| tool.as_str() == s).ok_or_else(|| ParseError::new("tool", s))
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Success => "success",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Success | ScanStatus::Failed)
    }
}

impl FromStr for ScanStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "success" => Ok(ScanStatus::Success),
            "failed" => Ok(ScanStatus::Failed),
            _ => Err(ParseError::new("scan status", s)),
        }
    }
}

/// One execution of one tool against one scope target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolScan {
    pub scan_id: Uuid,
    pub tool: Tool,
    pub scope_target_id: Uuid,
    pub auto_scan_session_id: Option<Uuid>,
    pub status: ScanStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub command: Option<String>,
    pub execution_time: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ToolScan {
    pub fn new(tool: Tool, scope_target_id: Uuid, auto_scan_session_id: Option<Uuid>) -> Self {
        ToolScan {
            scan_id: Uuid::now_v7(),
            tool,
            scope_target_id,
            auto_scan_session_id,
            status: ScanStatus::Pending,
            result: None,
            error: None,
            stdout: None,
            stderr: None,
            command: None,
            execution_time: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
