use serde::{Deserialize, Serialize};

/// A company domain with every source that reported it, most trusted source first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedCompanyDomain {
    pub domain: String,
    pub sources: Vec<String>,
}

/// One range as reported by one intel source. Ranges are not collapsed across sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedNetworkRange {
    pub cidr_block: String,
    pub asn: Option<String>,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
    pub source: String,
    pub scan_type: String,
}
