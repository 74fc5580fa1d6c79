//! Flappy Duel - two-player side-scrolling obstacle game
//!
//! One binary, several roles selected by `MODE`:
//! - `relay`: WebSocket relay that pairs two game instances by room code
//! - `single` / `host` / `join`: headless autopilot runs (host/join over the relay)
//! - `duel`: host and client in one process over an in-memory transport

mod app;
mod config;
mod game;
mod http;
mod net;
mod util;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::driver::{run_duel, run_headless};
use crate::app::AppState;
use crate::config::{Config, RunMode};
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    init_server_time();

    match config.mode {
        RunMode::Relay => serve_relay(config).await,
        RunMode::Duel => {
            let report = run_duel(&config).await?;
            for (round, (host, client)) in report.host.iter().zip(&report.client).enumerate() {
                info!(
                    round = round + 1,
                    host_score = host.final_score,
                    client_score = client.final_score,
                    host_result = ?host.winner,
                    "Round finished"
                );
            }
            Ok(())
        }
        RunMode::Single | RunMode::Host | RunMode::Join => {
            let outcomes = run_headless(&config).await?;
            for (round, outcome) in outcomes.iter().enumerate() {
                info!(
                    round = round + 1,
                    score = outcome.final_score,
                    opponent_score = ?outcome.opponent_score,
                    winner = ?outcome.winner,
                    "Round finished"
                );
            }
            Ok(())
        }
    }
}

async fn serve_relay(config: Config) -> anyhow::Result<()> {
    info!("Starting relay");

    let addr: SocketAddr = config.server_addr;
    let router = build_router(AppState::new(config));
    let listener = TcpListener::bind(addr).await?;

    info!("Relay listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws?id=XXXX", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
