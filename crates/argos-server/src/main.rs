use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use argos_client::{EngineLauncher, OutboundNotifier, ReqwestRobotsPolicy};
use argos_core::traits::SiteConfigSource;
use argos_core::{Scheduler, ScrapeService, SiteConfigLoader};
use argos_server::config::ServerConfig;
use argos_server::routes;
use argos_server::state::{AppState, LiveServices};
use argos_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("argos=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    let addr = format!("0.0.0.0:{}", config.port);

    let store = Store::open(config.store.clone()).await?;
    let sites = SiteConfigLoader::new(config.store.sites_dir());
    let loaded = sites.reload().await?;

    let launcher = EngineLauncher::new(config.engine)?;
    tracing::info!(engine = ?launcher.kind(), sites = loaded, "Engine ready");

    let scraper = ScrapeService::with_config(
        launcher,
        ReqwestRobotsPolicy::new()?,
        sites,
        config.scrape_service(),
    );
    let notifier = OutboundNotifier::from_endpoint(config.notify_webhook.as_deref())?;
    let scheduler = Scheduler::new(
        scraper.clone(),
        store.registrations(),
        store.results(),
        notifier,
        config.scheduler.clone(),
    );

    if config.scheduler_autostart {
        scheduler.start().await;
    }

    let state = Arc::new(AppState::<LiveServices>::new(scraper, scheduler.clone()));

    let app = routes::router(state, config.rate_limit_per_minute)?
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let report = scheduler.stop().await;
    tracing::info!(
        drained = report.drained,
        abandoned = report.abandoned,
        "Scheduler stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
