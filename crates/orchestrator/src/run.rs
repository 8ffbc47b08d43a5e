use crate::{Orchestrator, Result, StepContext};
use reconflow_core::{
    AutoScanConfig, AutoScanSession, FinalCounts, ScopeTarget, SessionStatus, Step, StepOutcome, StepRecord, TargetKind,
};
use results_sqlite::{Db, StoreError};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

enum RunEnd {
    Finished,
    ThresholdReached,
    Cancelled,
}

struct Checkpoint {
    names: Vec<String>,
    probe_error: Option<String>,
    threshold_reached: bool,
}

/// Names discovery steps start from before any checkpoint has run.
fn seed_candidates(db: &Db, target: &ScopeTarget) -> results_sqlite::Result<Vec<String>> {
    if let Some(domain) = target.base_domain() {
        return Ok(vec![domain]);
    }
    let domains: Vec<String> = db.consolidated_company_domains(target.id)?.into_iter().map(|d| d.domain).collect();
    Ok(if domains.is_empty() { vec![target.target.trim().to_string()] } else { domains })
}

impl Orchestrator {
    pub(crate) async fn run(&self, session_id: Uuid, token: CancellationToken) -> Result<AutoScanSession> {
        let result = self.run_to_end(session_id, &token).await;
        self.unregister(session_id);
        result
    }

    async fn run_to_end(&self, session_id: Uuid, token: &CancellationToken) -> Result<AutoScanSession> {
        let (session, target, started) = self.store().with(|db| {
            let session = db.session(session_id)?;
            let target = db.scope_target(session.scope_target_id)?;
            let started = db.advance_session(session_id, SessionStatus::Running)?;
            if started {
                db.reset_auto_scan_state(target.id)?;
            }
            Ok((session, target, started))
        })?;
        if !started {
            info!(%session_id, status = session.status.as_str(), "session is past running, not starting");
            return Ok(session);
        }
        info!(%session_id, scope_target_id = %target.id, target = %target.target, "auto-scan started");

        let outcome = self.drive(&session, &target, token).await;
        let counts = match self.final_counts(target.id).await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(%session_id, error = %err, "could not read final counts");
                FinalCounts::default()
            }
        };
        let (status, message) = match &outcome {
            Ok(RunEnd::Cancelled) => (SessionStatus::Cancelled, None),
            Ok(RunEnd::Finished) | Ok(RunEnd::ThresholdReached) => (SessionStatus::Completed, None),
            Err(err) => {
                error!(%session_id, error = %err, "auto-scan aborted");
                (SessionStatus::Failed, Some(err.to_string()))
            }
        };

        let finished = self.store().with(|db| {
            let mut session = db.finish_session(session_id, status, counts, message.as_deref())?;
            if session.final_consolidated_subdomains.is_none() {
                session = db.fill_final_counts(session_id, counts)?;
            }
            db.reset_auto_scan_state(target.id)?;
            Ok(session)
        })?;
        info!(
            %session_id,
            status = finished.status.as_str(),
            subdomains = counts.consolidated_subdomains,
            live_web_servers = counts.live_web_servers,
            "auto-scan finished"
        );
        Ok(finished)
    }

    async fn drive(&self, session: &AutoScanSession, target: &ScopeTarget, token: &CancellationToken) -> Result<RunEnd> {
        let config = &session.config_snapshot;
        let mut candidates = self.store().with(|db| seed_candidates(db, target))?;

        for step in Step::ALL {
            if !self.wait_for_go(target.id, token).await? {
                info!(session_id = %session.id, next_step = step.as_str(), "cancellation observed");
                return Ok(RunEnd::Cancelled);
            }
            if !config.is_enabled(step) {
                debug!(step = step.as_str(), "step disabled");
                self.store().with(|db| db.append_step_record(session.id, &StepRecord::skipped(step)))?;
                continue;
            }

            self.store().with(|db| db.set_current_step(target.id, step.as_str()))?;
            let started_at = OffsetDateTime::now_utc();
            let mut ctx = StepContext {
                scope_target: target.clone(),
                session_id: session.id,
                step,
                tool: step.tool(),
                candidates: candidates.clone(),
            };
            info!(session_id = %session.id, step = step.as_str(), candidates = ctx.candidates.len(), "step started");

            let (error, threshold_reached) = if step.is_checkpoint() {
                let cp = self.checkpoint(&mut ctx, config).await?;
                if !cp.names.is_empty() {
                    candidates = cp.names;
                }
                (cp.probe_error, cp.threshold_reached)
            } else {
                (self.inner.runner.run_step(&ctx).await.err().map(|e| format!("{e:#}")), false)
            };
            if let Some(err) = &error {
                warn!(session_id = %session.id, step = step.as_str(), error = %err, "step failed, continuing");
            }

            let record = StepRecord {
                step,
                outcome: if error.is_some() { StepOutcome::Failed } else { StepOutcome::Completed },
                error,
                started_at,
                ended_at: OffsetDateTime::now_utc(),
            };
            self.store().with(|db| db.append_step_record(session.id, &record))?;
            if threshold_reached {
                return Ok(RunEnd::ThresholdReached);
            }
        }
        Ok(RunEnd::Finished)
    }

    /// Consolidates, probes the consolidated names, then checks both thresholds.
    async fn checkpoint(&self, ctx: &mut StepContext, config: &AutoScanConfig) -> Result<Checkpoint> {
        let engine = self.engine().clone();
        let target = ctx.scope_target.clone();
        let names = tokio::task::spawn_blocking(move || {
            if target.kind == TargetKind::Company {
                engine.consolidate_company_domains(target.id)?;
            }
            engine.consolidate_subdomains(target.id)
        })
        .await??;
        if !names.is_empty() {
            ctx.candidates = names.clone();
        }

        let probe_error = self.inner.probe.probe(ctx).await.err().map(|e| format!("{e:#}"));

        let engine = self.engine().clone();
        let target_id = ctx.scope_target.id;
        let live = tokio::task::spawn_blocking(move || engine.live_web_server_count(target_id)).await??;
        let subdomains = names.len() as u64;
        let threshold_reached =
            config.subdomain_limit_exceeded(subdomains) || config.live_web_server_limit_exceeded(live);
        if threshold_reached {
            info!(
                step = ctx.step.as_str(),
                subdomains,
                live_web_servers = live,
                max_subdomains = config.max_consolidated_subdomains,
                max_live_web_servers = config.max_live_web_servers,
                "threshold exceeded, ending run early"
            );
        }
        Ok(Checkpoint { names, probe_error, threshold_reached })
    }

    async fn final_counts(&self, scope_target_id: Uuid) -> Result<FinalCounts> {
        let engine = self.engine().clone();
        let counts = tokio::task::spawn_blocking(move || {
            let consolidated_subdomains = engine.store().with(|db| db.consolidated_subdomain_count(scope_target_id))?;
            let live_web_servers = engine.live_web_server_count(scope_target_id)?;
            Ok::<_, StoreError>(FinalCounts { consolidated_subdomains, live_web_servers })
        })
        .await??;
        Ok(counts)
    }

    /// Blocks while the target is paused. Returns false once cancellation is observed.
    async fn wait_for_go(&self, scope_target_id: Uuid, token: &CancellationToken) -> Result<bool> {
        let mut paused = false;
        loop {
            if token.is_cancelled() {
                return Ok(false);
            }
            let state = self.store().with(|db| db.auto_scan_state(scope_target_id))?;
            if state.is_cancelled {
                return Ok(false);
            }
            if !state.is_paused {
                if paused {
                    info!(%scope_target_id, "auto-scan resumed");
                }
                return Ok(true);
            }
            if !paused {
                info!(%scope_target_id, step = %state.current_step, "auto-scan paused");
                paused = true;
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.inner.options.pause_poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LiveProbe, OrchestratorError, OrchestratorOptions, StepRunner};
    use async_trait::async_trait;
    use consolidation::ConsolidationEngine;
    use reconflow_core::{ScanMode, Tool};
    use results_sqlite::Store;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Hook = Box<dyn Fn(&StepContext) + Send + Sync>;

    struct FakeRunner {
        store: Store,
        outputs: HashMap<Tool, String>,
        failing: HashSet<Tool>,
        hook: Option<Hook>,
        calls: Mutex<Vec<(Step, Vec<String>)>>,
    }

    impl FakeRunner {
        fn new(store: &Store) -> Self {
            FakeRunner {
                store: store.clone(),
                outputs: HashMap::new(),
                failing: HashSet::new(),
                hook: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn steps(&self) -> Vec<Step> {
            self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    #[async_trait]
    impl StepRunner for FakeRunner {
        async fn run_step(&self, ctx: &StepContext) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((ctx.step, ctx.candidates.clone()));
            if let Some(hook) = &self.hook {
                hook(ctx);
            }
            if self.failing.contains(&ctx.tool) {
                anyhow::bail!("{} rate limited", ctx.tool);
            }
            let out = self.outputs.get(&ctx.tool).cloned().unwrap_or_default();
            self.store.with(|db| db.record_successful_scan(ctx.tool, ctx.scope_target.id, Some(ctx.session_id), out))?;
            Ok(())
        }
    }

    /// Every candidate answers on https.
    struct FakeProbe {
        store: Store,
    }

    #[async_trait]
    impl LiveProbe for FakeProbe {
        async fn probe(&self, ctx: &StepContext) -> anyhow::Result<()> {
            let lines: Vec<String> = ctx.candidates.iter().map(|c| format!("{{\"url\":\"https://{c}\"}}")).collect();
            self.store.with(|db| db.record_successful_scan(Tool::Httpx, ctx.scope_target.id, Some(ctx.session_id), lines.join("\n")))?;
            Ok(())
        }
    }

    fn target(store: &Store) -> ScopeTarget {
        let t = ScopeTarget::new(TargetKind::Wildcard, ScanMode::Active, "*.example.com");
        store.with(|db| db.insert_scope_target(&t)).unwrap();
        t
    }

    fn orchestrator(store: &Store, runner: Arc<FakeRunner>, poll: Duration) -> Orchestrator {
        Orchestrator::new(
            ConsolidationEngine::new(store.clone()),
            runner,
            Arc::new(FakeProbe { store: store.clone() }),
            OrchestratorOptions { pause_poll: poll },
        )
    }

    fn names(n: usize) -> String {
        (0..n).map(|i| format!("h{i}.example.com")).collect::<Vec<_>>().join("\n")
    }

    #[tokio::test]
    async fn runs_every_step_in_order_and_feeds_names_forward() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        runner.outputs.insert(Tool::Subfinder, "api.example.com\nwww.example.com".into());
        let runner = Arc::new(runner);
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));

        let session = orch.create_session(t.id, None).unwrap();
        let done = orch.run_session(session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.steps_run.iter().map(|r| r.step).collect::<Vec<_>>(), Step::ALL.to_vec());
        assert_eq!(runner.steps().len(), 12);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].1, vec!["example.com"]);
        let shuffledns = calls.iter().find(|(s, _)| *s == Step::Shuffledns).unwrap();
        assert_eq!(shuffledns.1, vec!["api.example.com", "www.example.com"]);
        assert_eq!(done.final_consolidated_subdomains, Some(2));
        assert_eq!(done.final_live_web_servers, Some(2));
        assert!(store.with(|db| db.auto_scan_state(t.id)).unwrap().is_idle());
    }

    #[tokio::test]
    async fn disabled_steps_are_logged_as_skipped() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let runner = Arc::new(FakeRunner::new(&store));
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));
        let config = AutoScanConfig::default().with_step(Step::Gau, false).with_step(Step::ConsolidateHttpxRound2, false);

        let session = orch.create_session(t.id, Some(config)).unwrap();
        let done = orch.run_session(session.id).await.unwrap();

        assert!(!runner.steps().contains(&Step::Gau));
        let gau = done.steps_run.iter().find(|r| r.step == Step::Gau).unwrap();
        assert_eq!(gau.outcome, StepOutcome::Skipped);
        assert_eq!(done.steps_run.len(), 15);
    }

    #[tokio::test]
    async fn a_failing_tool_does_not_stop_the_run() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        runner.failing.insert(Tool::Amass);
        let runner = Arc::new(runner);
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));

        let session = orch.create_session(t.id, None).unwrap();
        let done = orch.run_session(session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        let amass = &done.steps_run[0];
        assert_eq!(amass.outcome, StepOutcome::Failed);
        assert!(amass.error.as_deref().unwrap_or_default().contains("rate limited"));
        assert!(runner.steps().contains(&Step::Metadata));
    }

    #[tokio::test]
    async fn threshold_ends_the_run_at_the_checkpoint() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        runner.outputs.insert(Tool::Subfinder, names(6));
        let runner = Arc::new(runner);
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));
        let config = AutoScanConfig { max_consolidated_subdomains: 5, ..Default::default() };

        let session = orch.create_session(t.id, Some(config)).unwrap();
        let done = orch.run_session(session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.steps_run.last().map(|r| r.step), Some(Step::ConsolidateHttpxRound1));
        assert!(!runner.steps().contains(&Step::Shuffledns));
        assert_eq!(done.final_consolidated_subdomains, Some(6));
    }

    #[tokio::test]
    async fn exactly_at_the_maximum_keeps_going() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        runner.outputs.insert(Tool::Subfinder, names(5));
        let runner = Arc::new(runner);
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));
        let config = AutoScanConfig { max_consolidated_subdomains: 5, ..Default::default() };

        let session = orch.create_session(t.id, Some(config)).unwrap();
        orch.run_session(session.id).await.unwrap();
        assert!(runner.steps().contains(&Step::Metadata));
    }

    #[tokio::test]
    async fn pause_holds_the_current_step_until_resumed() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        let hook_store = store.clone();
        runner.hook = Some(Box::new(move |ctx| {
            if ctx.step == Step::Gau {
                hook_store.with(|db| db.set_paused(ctx.scope_target.id, true)).unwrap();
            }
        }));
        let runner = Arc::new(runner);
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));

        let (_session, handle) = orch.start(t.id, None).unwrap();
        let mut waited = 0;
        while !store.with(|db| db.auto_scan_state(t.id)).unwrap().is_paused {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
            assert!(waited < 500, "run never paused");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runner.steps().last(), Some(&Step::Gau));
        assert_eq!(store.with(|db| db.auto_scan_state(t.id)).unwrap().current_step, "gau");

        store.with(|db| db.set_paused(t.id, false)).unwrap();
        let done = tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        let steps = runner.steps();
        let gau = steps.iter().position(|s| *s == Step::Gau).unwrap();
        assert_eq!(steps[gau + 1], Step::Ctl);
    }

    #[tokio::test]
    async fn cancel_flag_stops_at_the_next_boundary() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        let hook_store = store.clone();
        runner.hook = Some(Box::new(move |ctx| {
            if ctx.step == Step::Assetfinder {
                hook_store.with(|db| db.set_cancelled(ctx.scope_target.id, true)).unwrap();
            }
        }));
        let runner = Arc::new(runner);
        let orch = orchestrator(&store, runner.clone(), Duration::from_millis(10));

        let session = orch.create_session(t.id, None).unwrap();
        let done = orch.run_session(session.id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Cancelled);
        assert_eq!(runner.steps(), vec![Step::Amass, Step::Sublist3r, Step::Assetfinder]);
        assert!(done.ended_at.is_some());
        assert_eq!(done.final_consolidated_subdomains, Some(0));
        assert!(store.with(|db| db.auto_scan_state(t.id)).unwrap().is_idle());
    }

    #[tokio::test]
    async fn operator_cancel_wakes_a_paused_run() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let mut runner = FakeRunner::new(&store);
        let hook_store = store.clone();
        runner.hook = Some(Box::new(move |ctx| {
            if ctx.step == Step::Amass {
                hook_store.with(|db| db.set_paused(ctx.scope_target.id, true)).unwrap();
            }
        }));
        let runner = Arc::new(runner);
        // a poll this long would hang the test if the token did not wake the wait
        let orch = orchestrator(&store, runner.clone(), Duration::from_secs(3600));

        let (session, handle) = orch.start(t.id, None).unwrap();
        while !store.with(|db| db.auto_scan_state(t.id)).unwrap().is_paused {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let out = orch.cancel(session.id, false).unwrap();
        assert!(!out.already_completed);

        let done = tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Cancelled);
        assert_eq!(runner.steps(), vec![Step::Amass]);
        assert!(!orch.is_running(session.id));
    }

    #[tokio::test]
    async fn late_cancel_does_not_undo_completion() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let orch = orchestrator(&store, Arc::new(FakeRunner::new(&store)), Duration::from_millis(10));
        let session = orch.create_session(t.id, None).unwrap();
        orch.run_session(session.id).await.unwrap();

        let out = orch.cancel(session.id, false).unwrap();
        assert!(out.already_completed);
        assert_eq!(out.session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn one_active_session_per_target() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let orch = orchestrator(&store, Arc::new(FakeRunner::new(&store)), Duration::from_millis(10));
        orch.create_session(t.id, None).unwrap();
        let err = orch.create_session(t.id, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::Busy(id) if id == t.id));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn recovery_fails_orphans_and_resets_state() {
        let store = Store::in_memory().unwrap();
        let t = target(&store);
        let orch = orchestrator(&store, Arc::new(FakeRunner::new(&store)), Duration::from_millis(10));
        let session = orch.create_session(t.id, None).unwrap();
        store.with(|db| db.advance_session(session.id, SessionStatus::Running)).unwrap();
        store.with(|db| db.set_current_step(t.id, "gau")).unwrap();

        let recovery = orch.recover_stale_runs().unwrap();
        assert_eq!(recovery.failed_sessions, vec![session.id]);
        assert_eq!(recovery.reset_targets, vec![t.id]);
        let s = store.with(|db| db.session(session.id)).unwrap();
        assert_eq!(s.status, SessionStatus::Failed);
        assert_eq!(s.error_message.as_deref(), Some(crate::ORPHANED_SESSION_MESSAGE));
        assert!(store.with(|db| db.auto_scan_state(t.id)).unwrap().is_idle());
    }
}
