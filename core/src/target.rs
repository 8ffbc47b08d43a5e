use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::names::normalize_name;
use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Company,
    Wildcard,
    #[serde(rename = "URL")]
    Url,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Company => "Company",
            TargetKind::Wildcard => "Wildcard",
            TargetKind::Url => "URL",
        }
    }
}

impl FromStr for TargetKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "company" => Ok(TargetKind::Company),
            "wildcard" => Ok(TargetKind::Wildcard),
            "url" => Ok(TargetKind::Url),
            _ => Err(ParseError::new("target kind", s)),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanMode {
    Passive,
    Active,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Passive => "Passive",
            ScanMode::Active => "Active",
        }
    }
}

impl FromStr for ScanMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passive" => Ok(ScanMode::Passive),
            "active" => Ok(ScanMode::Active),
            _ => Err(ParseError::new("scan mode", s)),
        }
    }
}

/// The company, wildcard domain or URL under assessment. Every other row hangs off one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeTarget {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub mode: ScanMode,
    pub target: String,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ScopeTarget {
    pub fn new(kind: TargetKind, mode: ScanMode, target: impl Into<String>) -> Self {
        ScopeTarget {
            id: Uuid::now_v7(),
            kind,
            mode,
            target: target.into(),
            active: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Domain every in-scope name must sit under. Company targets have none;
    /// their scope is the set of consolidated company domains.
    pub fn base_domain(&self) -> Option<String> {
        match self.kind {
            TargetKind::Wildcard => normalize_name(self.target.trim().trim_start_matches("*.")),
            TargetKind::Url => normalize_name(&self.target),
            TargetKind::Company => None,
        }
    }
}
