use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use consolidation::ConsolidationEngine;
use orchestrator::Orchestrator;
use reconflow_core::{ScanMode, ScopeTarget, TargetKind, Tool, ToolScan};
use results_sqlite::{Db, Store};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

mod adapters;
mod config;
mod export;
mod logging;
mod server;

use adapters::{CommandStepRunner, WebSurfaceProbe};
use config::Config;
use export::ExportFormat;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Pass {
    Subdomains,
    CompanyDomains,
    NetworkRanges,
    AttackSurface,
}

#[derive(Debug, Subcommand)]
enum TargetCmd {
    /// Register a scope target
    Add {
        /// Company, Wildcard or URL
        #[arg(long)]
        kind: String,
        /// Passive or Active
        #[arg(long, default_value = "Active")]
        mode: String,
        /// Company name, wildcard domain (*.example.com) or URL
        target: String,
    },
    /// List scope targets (JSON)
    List,
    /// Delete a scope target and everything recorded for it
    Delete { id: Uuid },
}

#[derive(Debug, Parser)]
#[command(name = "reconflow", version, about = "Attack-surface discovery pipeline and consolidation engine")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./reconflow.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Serve the HTTP API
    Serve {
        /// Listen address; overrides server.bind
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Manage scope targets
    Target {
        #[command(subcommand)]
        cmd: TargetCmd,
    },
    /// Record a tool's output file as a successful scan with no session
    Ingest {
        #[arg(long)]
        tool: Tool,
        #[arg(long)]
        target: Uuid,
        file: PathBuf,
    },
    /// Run one auto-scan session in the foreground. Ctrl-C cancels at the next step boundary.
    Run {
        #[arg(long)]
        target: Uuid,
    },
    /// Run consolidation passes. Without --pass every pass runs in dependency order.
    Consolidate {
        #[arg(long)]
        target: Uuid,
        #[arg(long, value_enum)]
        pass: Option<Pass>,
    },
    /// Export attack-surface assets
    Export {
        #[arg(long)]
        target: Uuid,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Parquet)]
        format: ExportFormat,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn orchestrator(cfg: &Config, store: &Store) -> Orchestrator {
    Orchestrator::new(
        ConsolidationEngine::new(store.clone()),
        Arc::new(CommandStepRunner::new(store.clone(), cfg.tools.clone())),
        Arc::new(WebSurfaceProbe::new(store.clone(), cfg.probe.clone())),
        cfg.orchestrator.options(),
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    logging::init(&cfg.log);

    match cli.command {
        Commands::Version => {
            println!("reconflow {} (core {})", env!("CARGO_PKG_VERSION"), reconflow_core::version());
        }
        Commands::Target { cmd } => {
            let store = Store::open(&cfg.database.path)?;
            match cmd {
                TargetCmd::Add { kind, mode, target } => {
                    let kind: TargetKind = kind.parse()?;
                    let mode: ScanMode = mode.parse()?;
                    let t = ScopeTarget::new(kind, mode, target.trim());
                    store.with(|db| db.insert_scope_target(&t))?;
                    print_json(&t)?;
                }
                TargetCmd::List => print_json(&store.with(|db| db.list_scope_targets())?)?,
                TargetCmd::Delete { id } => {
                    store.with(|db| db.delete_scope_target(id))?;
                    info!(scope_target_id = %id, "scope target deleted");
                }
            }
        }
        Commands::Ingest { tool, target, file } => {
            let contents = std::fs::read_to_string(&file)?;
            let store = Store::open(&cfg.database.path)?;
            let scan: ToolScan = store.with(|db| db.record_successful_scan(tool, target, None, contents))?;
            info!(%tool, scope_target_id = %target, scan_id = %scan.scan_id, "ingested {}", file.display());
            print_json(&serde_json::json!({ "tool": tool, "scan_id": scan.scan_id }))?;
        }
        Commands::Consolidate { target, pass } => {
            let store = Store::open(&cfg.database.path)?;
            let engine = ConsolidationEngine::new(store.clone());
            let kind = store.with(|db| db.scope_target(target))?.kind;
            let out = match pass {
                Some(Pass::Subdomains) => serde_json::json!({ "subdomains": engine.consolidate_subdomains(target)? }),
                Some(Pass::CompanyDomains) => serde_json::json!({ "company_domains": engine.consolidate_company_domains(target)? }),
                Some(Pass::NetworkRanges) => serde_json::json!({ "network_ranges": engine.consolidate_network_ranges(target)? }),
                Some(Pass::AttackSurface) => serde_json::json!({ "attack_surface": engine.consolidate_attack_surface(target)? }),
                None => {
                    let company = if kind == TargetKind::Company { Some(engine.consolidate_company_domains(target)?) } else { None };
                    let subdomains = engine.consolidate_subdomains(target)?;
                    let ranges = engine.consolidate_network_ranges(target)?;
                    let summary = engine.consolidate_attack_surface(target)?;
                    serde_json::json!({
                        "company_domains": company,
                        "subdomains": subdomains.len(),
                        "network_ranges": ranges.len(),
                        "attack_surface": summary,
                    })
                }
            };
            print_json(&out)?;
        }
        Commands::Export { target, out, format } => {
            let db = Db::open_or_create(&cfg.database.path)?;
            let n = export::export_assets(&db, target, &out, format)?;
            info!(scope_target_id = %target, rows = n, path = %out.display(), "exported assets");
        }
        Commands::Run { target } => {
            let store = Store::open(&cfg.database.path)?;
            let orch = orchestrator(&cfg, &store);
            let rt = tokio::runtime::Runtime::new()?;
            let finished = rt.block_on(async move {
                let session = orch.create_session(target, None)?;
                let run = orch.run_session(session.id);
                tokio::pin!(run);
                tokio::select! {
                    r = &mut run => r,
                    _ = tokio::signal::ctrl_c() => {
                        warn!(session_id = %session.id, "interrupted, cancelling after the current step");
                        orch.cancel(session.id, false)?;
                        run.await
                    }
                }
            })?;
            print_json(&finished)?;
        }
        Commands::Serve { bind } => {
            let store = Store::open(&cfg.database.path)?;
            let orch = orchestrator(&cfg, &store);
            let recovery = orch.recover_stale_runs()?;
            if !recovery.failed_sessions.is_empty() {
                warn!(sessions = ?recovery.failed_sessions, "failed sessions orphaned by a previous process");
            }
            let bind = bind.unwrap_or(cfg.server.bind);
            if cfg.tools.is_empty() {
                warn!("no tool commands configured; discovery steps will fail");
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(server::serve(server::AppState { orchestrator: orch }, bind))
                .map_err(|e| anyhow!("server error: {e:#}"))?;
        }
    }
    Ok(())
}
