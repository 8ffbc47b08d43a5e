use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseError, Tool};

/// `current_step` value while no run is active for a target.
pub const IDLE: &str = "IDLE";

/// One unit of orchestration work, either a tool invocation or a consolidation checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Amass,
    Sublist3r,
    Assetfinder,
    Gau,
    Ctl,
    Subfinder,
    ConsolidateHttpxRound1,
    Shuffledns,
    Cewl,
    ConsolidateHttpxRound2,
    Gospider,
    Subdomainizer,
    ConsolidateHttpxRound3,
    NucleiScreenshot,
    Metadata,
}

impl Step {
    /// Pipeline order. Later discovery steps consume names consolidated by earlier checkpoints.
    pub const ALL: [Step; 15] = [
        Step::Amass,
        Step::Sublist3r,
        Step::Assetfinder,
        Step::Gau,
        Step::Ctl,
        Step::Subfinder,
        Step::ConsolidateHttpxRound1,
        Step::Shuffledns,
        Step::Cewl,
        Step::ConsolidateHttpxRound2,
        Step::Gospider,
        Step::Subdomainizer,
        Step::ConsolidateHttpxRound3,
        Step::NucleiScreenshot,
        Step::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Amass => "amass",
            Step::Sublist3r => "sublist3r",
            Step::Assetfinder => "assetfinder",
            Step::Gau => "gau",
            Step::Ctl => "ctl",
            Step::Subfinder => "subfinder",
            Step::ConsolidateHttpxRound1 => "consolidate_httpx_round1",
            Step::Shuffledns => "shuffledns",
            Step::Cewl => "cewl",
            Step::ConsolidateHttpxRound2 => "consolidate_httpx_round2",
            Step::Gospider => "gospider",
            Step::Subdomainizer => "subdomainizer",
            Step::ConsolidateHttpxRound3 => "consolidate_httpx_round3",
            Step::NucleiScreenshot => "nuclei_screenshot",
            Step::Metadata => "metadata",
        }
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self, Step::ConsolidateHttpxRound1 | Step::ConsolidateHttpxRound2 | Step::ConsolidateHttpxRound3)
    }

    /// Tool whose scan table this step writes to. Checkpoints write `httpx` rows through the live probe.
    pub fn tool(&self) -> Tool {
        match self {
            Step::Amass => Tool::Amass,
            Step::Sublist3r => Tool::Sublist3r,
            Step::Assetfinder => Tool::Assetfinder,
            Step::Gau => Tool::Gau,
            Step::Ctl => Tool::Ctl,
            Step::Subfinder => Tool::Subfinder,
            Step::Shuffledns => Tool::Shuffledns,
            Step::Cewl => Tool::Cewl,
            Step::Gospider => Tool::Gospider,
            Step::Subdomainizer => Tool::Subdomainizer,
            Step::NucleiScreenshot => Tool::NucleiScreenshot,
            Step::Metadata => Tool::Metadata,
            Step::ConsolidateHttpxRound1 | Step::ConsolidateHttpxRound2 | Step::ConsolidateHttpxRound3 => Tool::Httpx,
        }
    }
}

impl FromStr for Step {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL.into_iter().find(|step| step.as_str() == s).ok_or_else(|| ParseError::new("step", s))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_places_checkpoints_between_discovery_waves() {
        let names: Vec<&str> = Step::ALL.iter().map(Step::as_str).collect();
        assert_eq!(names.first(), Some(&"amass"));
        assert_eq!(names.last(), Some(&"metadata"));
        let round1 = names.iter().position(|n| *n == "consolidate_httpx_round1").unwrap();
        let subfinder = names.iter().position(|n| *n == "subfinder").unwrap();
        let shuffledns = names.iter().position(|n| *n == "shuffledns").unwrap();
        assert!(subfinder < round1 && round1 < shuffledns);
        assert_eq!(Step::ALL.iter().filter(|s| s.is_checkpoint()).count(), 3);
    }

    #[test]
    fn serde_and_display_agree() {
        for step in Step::ALL {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
        }
    }
}
