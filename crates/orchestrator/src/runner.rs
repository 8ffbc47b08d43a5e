use async_trait::async_trait;
use reconflow_core::{ScopeTarget, Step, Tool};
use uuid::Uuid;

/// Everything a step needs to run against one target.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub scope_target: ScopeTarget,
    pub session_id: Uuid,
    pub step: Step,
    pub tool: Tool,
    /// Names the step should work on: the seed before the first checkpoint,
    /// the consolidated subdomain set afterwards.
    pub candidates: Vec<String>,
}

/// Runs one discovery tool to a terminal status. Implementations write the tool's scan
/// row themselves; an `Err` is recorded as a failed step and the pipeline moves on.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, ctx: &StepContext) -> anyhow::Result<()>;
}

/// Probes candidates for live web servers and writes one `httpx` row.
#[async_trait]
pub trait LiveProbe: Send + Sync {
    async fn probe(&self, ctx: &StepContext) -> anyhow::Result<()>;
}
