mod errors;
mod handlers;

pub use errors::{AppError, AppResult};

use axum::{
    routing::{delete, get, post},
    Router,
};
use orchestrator::Orchestrator;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone, Debug)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub fn create_app(state: AppState) -> Router {
    use handlers::{auto_scan, surface, targets};

    Router::new()
        .route("/scopetarget/add", post(targets::add))
        .route("/scopetarget/read", get(targets::list))
        .route("/scopetarget/delete/{id}", delete(targets::remove))
        .route("/api/auto-scan-state/{target_id}", get(auto_scan::get_state).post(auto_scan::put_state))
        .route("/api/auto-scan-config", get(auto_scan::get_config).post(auto_scan::put_config))
        .route("/api/auto-scan/session/start", post(auto_scan::start_session))
        .route("/api/auto-scan/session/{id}", get(auto_scan::get_session))
        .route("/api/auto-scan/sessions", get(auto_scan::list_sessions))
        .route("/api/auto-scan/session/{id}/cancel", post(auto_scan::cancel_session))
        .route("/api/auto-scan/session/{id}/final-stats", post(auto_scan::final_stats))
        .route("/consolidate-subdomains/{id}", get(surface::consolidate_subdomains))
        .route("/consolidated-subdomains/{id}", get(surface::consolidated_subdomains))
        .route("/consolidate-company-domains/{id}", get(surface::consolidate_company_domains))
        .route("/consolidated-company-domains/{id}", get(surface::consolidated_company_domains))
        .route("/consolidate-network-ranges/{id}", get(surface::consolidate_network_ranges))
        .route("/consolidated-network-ranges/{id}", get(surface::consolidated_network_ranges))
        .route(
            "/consolidate-attack-surface/{id}",
            get(surface::consolidate_attack_surface).post(surface::consolidate_attack_surface),
        )
        .route("/attack-surface-assets/{id}", get(surface::assets))
        .route("/attack-surface-asset-counts/{id}", get(surface::asset_counts))
        .route("/attack-surface-relationships/{id}", get(surface::relationships))
        .route("/attack-surface-dns-records/{id}", get(surface::dns_records))
        .route("/attack-surface-metadata/{id}", get(surface::metadata))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
