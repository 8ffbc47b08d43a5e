//! The orchestrator's seams bound to real work: shell commands for discovery tools
//! and the web-surface probe for checkpoints.

use crate::config::{ProbeConfig, ToolCommand};
use anyhow::{bail, Result};
use async_trait::async_trait;
use orchestrator::{LiveProbe, StepContext, StepRunner};
use reconflow_core::{ScanStatus, Tool, ToolScan};
use results_sqlite::{ScanCompletion, Store};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const NO_COMMAND: &str = "no command configured";

/// Quotes `s` for `sh -c`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn render(template: &str, target: &str, input: &str) -> String {
    template.replace("{target}", &shell_quote(target)).replace("{input}", &shell_quote(input))
}

fn last_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

pub struct CommandStepRunner {
    store: Store,
    tools: HashMap<Tool, ToolCommand>,
    work_dir: PathBuf,
}

impl CommandStepRunner {
    pub fn new(store: Store, tools: HashMap<Tool, ToolCommand>) -> Self {
        CommandStepRunner { store, tools, work_dir: std::env::temp_dir() }
    }

    fn finish(&self, scan: &ToolScan, done: ScanCompletion) -> Result<()> {
        self.store.with(|db| db.complete_tool_scan(scan.tool, scan.scan_id, &done))?;
        if done.status == ScanStatus::Failed {
            bail!(done.error.unwrap_or_else(|| "failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StepRunner for CommandStepRunner {
    async fn run_step(&self, ctx: &StepContext) -> Result<()> {
        let scan = ToolScan::new(ctx.tool, ctx.scope_target.id, Some(ctx.session_id));
        self.store.with(|db| db.insert_tool_scan(&scan))?;

        let Some(tool_cmd) = self.tools.get(&ctx.tool) else {
            warn!(tool = %ctx.tool, "{NO_COMMAND}");
            return self.finish(&scan, ScanCompletion::failed(format!("{NO_COMMAND} for {}", ctx.tool)));
        };

        // The row exists from here on; every early return still has to finish it.
        let input = self.work_dir.join(format!("reconflow-{}-{}.txt", ctx.tool, scan.scan_id));
        let target = ctx.scope_target.base_domain().unwrap_or_else(|| ctx.scope_target.target.trim().to_string());
        let command = render(&tool_cmd.command, &target, &input.to_string_lossy());
        if let Err(err) = self.store.with(|db| db.mark_tool_scan_running(scan.tool, scan.scan_id, Some(&command))) {
            return self.finish(&scan, ScanCompletion::failed(format!("marking scan running: {err}")));
        }
        if let Err(err) = tokio::fs::write(&input, ctx.candidates.join("\n")).await {
            return self.finish(&scan, ScanCompletion::failed(format!("writing {}: {err}", input.display())));
        }
        debug!(tool = %ctx.tool, %command, "spawning");

        let started = Instant::now();
        let output = Command::new("sh").arg("-c").arg(&command).kill_on_drop(true).output().await;
        let elapsed = format!("{:.2}s", started.elapsed().as_secs_f64());
        if let Err(err) = tokio::fs::remove_file(&input).await {
            debug!(path = %input.display(), error = %err, "could not remove input file");
        }

        let done = match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                let (status, result, error) = if out.status.success() {
                    (ScanStatus::Success, Some(stdout.clone()), None)
                } else {
                    let reason = last_line(&stderr).map(str::to_string).unwrap_or_else(|| out.status.to_string());
                    (ScanStatus::Failed, None, Some(reason))
                };
                ScanCompletion { status, result, error, stdout: Some(stdout), stderr: Some(stderr), execution_time: Some(elapsed) }
            }
            Err(err) => ScanCompletion { execution_time: Some(elapsed), ..ScanCompletion::failed(format!("spawn failed: {err}")) },
        };
        info!(tool = %ctx.tool, status = done.status.as_str(), "tool finished");
        self.finish(&scan, done)
    }
}

pub struct WebSurfaceProbe {
    store: Store,
    config: ProbeConfig,
}

impl WebSurfaceProbe {
    pub fn new(store: Store, config: ProbeConfig) -> Self {
        WebSurfaceProbe { store, config }
    }
}

#[async_trait]
impl LiveProbe for WebSurfaceProbe {
    async fn probe(&self, ctx: &StepContext) -> Result<()> {
        let scan = ToolScan::new(Tool::Httpx, ctx.scope_target.id, Some(ctx.session_id));
        self.store.with(|db| db.insert_tool_scan(&scan))?;
        self.store.with(|db| db.mark_tool_scan_running(scan.tool, scan.scan_id, Some("web-surface probe")))?;

        let started = Instant::now();
        let probed = web_surface::probe_many(&ctx.candidates, &self.config.ports, &self.config.options(), self.config.concurrency).await;
        let lines = probed.and_then(|results| {
            let live = results.iter().filter(|r| r.is_live()).count();
            Ok((live, web_surface::to_json_lines(&results)?))
        });
        let elapsed = format!("{:.2}s", started.elapsed().as_secs_f64());

        let done = match lines {
            Ok((live, text)) => {
                info!(step = ctx.step.as_str(), candidates = ctx.candidates.len(), live, "probe finished");
                ScanCompletion { execution_time: Some(elapsed), ..ScanCompletion::success(text) }
            }
            Err(err) => ScanCompletion { execution_time: Some(elapsed), ..ScanCompletion::failed(format!("{err:#}")) },
        };
        self.store.with(|db| db.complete_tool_scan(scan.tool, scan.scan_id, &done))?;
        if let Some(err) = done.error {
            bail!(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_core::{AutoScanConfig, ScanMode, ScopeTarget, Step, TargetKind};
    use uuid::Uuid;

    fn ctx(store: &Store, step: Step) -> StepContext {
        let t = ScopeTarget::new(TargetKind::Wildcard, ScanMode::Active, "*.example.com");
        store.with(|db| db.insert_scope_target(&t)).unwrap();
        let session = store.with(|db| db.create_session(t.id, &AutoScanConfig::default())).unwrap();
        StepContext {
            scope_target: t,
            session_id: session.id,
            step,
            tool: step.tool(),
            candidates: vec!["example.com".into(), "www.example.com".into()],
        }
    }

    fn rows(store: &Store, tool: Tool, target: Uuid) -> Vec<ToolScan> {
        store.with(|db| db.successful_tool_scans(tool, target)).unwrap()
    }

    #[test]
    fn templates_quote_substitutions() {
        assert_eq!(render("amass enum -d {target}", "example.com", "/tmp/x"), "amass enum -d 'example.com'");
        assert_eq!(render("cat {input}", "t", "/tmp/it's"), r"cat '/tmp/it'\''s'");
    }

    #[tokio::test]
    async fn successful_command_stores_stdout_as_result() {
        let store = Store::in_memory().unwrap();
        let ctx = ctx(&store, Step::Subfinder);
        let mut tools = HashMap::new();
        tools.insert(Tool::Subfinder, ToolCommand { command: "echo api.{target}; cat {input}".into() });
        let runner = CommandStepRunner::new(store.clone(), tools);

        runner.run_step(&ctx).await.unwrap();
        let scans = rows(&store, Tool::Subfinder, ctx.scope_target.id);
        assert_eq!(scans.len(), 1);
        let result = scans[0].result.as_deref().unwrap();
        assert!(result.contains("api.example.com"));
        assert!(result.contains("www.example.com"));
        assert_eq!(scans[0].auto_scan_session_id, Some(ctx.session_id));
        assert!(scans[0].command.as_deref().unwrap().starts_with("echo api.'example.com'"));
    }

    #[tokio::test]
    async fn failing_command_marks_row_and_step_failed() {
        let store = Store::in_memory().unwrap();
        let ctx = ctx(&store, Step::Amass);
        let mut tools = HashMap::new();
        tools.insert(Tool::Amass, ToolCommand { command: "echo rate limited >&2; exit 3".into() });
        let runner = CommandStepRunner::new(store.clone(), tools);

        let err = runner.run_step(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        let scans = store.with(|db| db.tool_scans_for_session(Tool::Amass, ctx.session_id)).unwrap();
        assert_eq!(scans[0].status, ScanStatus::Failed);
        assert_eq!(scans[0].stderr.as_deref().map(str::trim), Some("rate limited"));
    }

    #[tokio::test]
    async fn unwritable_input_file_still_finishes_the_row() {
        let store = Store::in_memory().unwrap();
        let ctx = ctx(&store, Step::Amass);
        let mut tools = HashMap::new();
        tools.insert(Tool::Amass, ToolCommand { command: "cat {input}".into() });
        let mut runner = CommandStepRunner::new(store.clone(), tools);
        runner.work_dir = PathBuf::from("/nonexistent/reconflow/work");

        let err = runner.run_step(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("writing /nonexistent/reconflow/work"), "{err}");
        let scans = store.with(|db| db.tool_scans_for_session(Tool::Amass, ctx.session_id)).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].status, ScanStatus::Failed);
        assert!(scans[0].error.as_deref().unwrap().contains("/nonexistent/reconflow/work"));
    }

    #[tokio::test]
    async fn missing_command_fails_the_step() {
        let store = Store::in_memory().unwrap();
        let ctx = ctx(&store, Step::Gau);
        let runner = CommandStepRunner::new(store.clone(), HashMap::new());
        let err = runner.run_step(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with(NO_COMMAND));
        let scans = store.with(|db| db.tool_scans_for_session(Tool::Gau, ctx.session_id)).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].status, ScanStatus::Failed);
    }
}
