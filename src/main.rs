//! lobbyroute HTTP server

use clap::Parser;
use lobbyroute::cli::{Cli, Command, generate_config_template};
use lobbyroute::handlers::{self, AppState};
use lobbyroute::{config::Config, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                println!("Configuration template written to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Arc::new(Config::from_file(&cli.config)?);
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config = %cli.config,
        providers = config.providers.len(),
        tiers = config.cascade.len(),
        "Starting lobbyroute on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(config.clone())?;

    if let Some(path) = &config.cache.snapshot_path {
        if let Err(e) = state.cache().restore(path) {
            tracing::warn!(error = %e, "Cache snapshot could not be restored, starting empty");
        }
    }

    let sweep_cache = state.cache().clone();
    let sweep_interval = Duration::from_secs(config.cache.sweep_interval_seconds);
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_cache.clear_expired();
        }
    });

    let app = handlers::app(state.clone());

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    if let Some(path) = &config.cache.snapshot_path {
        if let Err(e) = state.cache().persist(path) {
            tracing::error!(error = %e, "Failed to write cache snapshot");
        }
    }
    tracing::info!("lobbyroute stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
