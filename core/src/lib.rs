//! Core domain types shared by the result store, the consolidation engine and
//! the auto-scan orchestrator.

pub mod asset;
pub mod config;
pub mod consolidated;
pub mod names;
pub mod session;
pub mod step;
pub mod target;
pub mod tool;

pub use asset::*;
pub use config::AutoScanConfig;
pub use consolidated::*;
pub use session::*;
pub use step::{Step, IDLE};
pub use target::{ScanMode, ScopeTarget, TargetKind};
pub use tool::{ScanStatus, Tool, ToolScan};

use thiserror::Error;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returned when a persisted or user-supplied token does not name a known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        ParseError { kind, value: value.to_string() }
    }
}
