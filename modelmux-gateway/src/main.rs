use clap::Parser;
use modelmux_core::bootstrap::{bootstrap_from_env, configure_router_from_env, BootstrapOptions};
use modelmux_core::registry::ProviderRegistry;
use modelmux_core::router::Router;
use modelmux_gateway::{create_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "modelmux-gateway", about = "Management API for the Modelmux LLM gateway")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Background health probe interval in seconds.
    #[arg(long, default_value_t = 30)]
    probe_interval: u64,

    /// Skip the bootstrap health checks for faster startup.
    #[arg(long)]
    skip_health_check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let registry = Arc::new(ProviderRegistry::default());
    let options = BootstrapOptions {
        skip_health_check: args.skip_health_check,
        ..Default::default()
    };
    let report = bootstrap_from_env(&registry, &options).await;
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    for (name, reason) in &report.failed {
        tracing::error!(provider = %name, %reason, "bootstrap registration failed");
    }
    tracing::info!(providers = ?report.bootstrapped, "providers registered");

    let router = Arc::new(Router::new(Arc::clone(&registry)));
    if let Err(e) = configure_router_from_env(&router, report.default_provider.clone()) {
        tracing::warn!(error = %e, "routing environment ignored");
    }

    Arc::clone(&registry).start_periodic_health_check(Duration::from_secs(args.probe_interval));

    let app = create_router(AppState::new(Arc::clone(&registry), router));
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "management surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    registry.close().await;
    Ok(())
}
