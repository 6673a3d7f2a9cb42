//! Binary entrypoint: load config, wire the app, serve, shut down cleanly.

use std::net::SocketAddr;

use climb_hub::api::build_router;
use climb_hub::AppState;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    climb_otel::init();

    let config = match climb_config::load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match config.server.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(%err, bind_addr = %config.server.bind_addr, "invalid server.bind_addr");
            std::process::exit(1);
        }
    };

    let state = AppState::from_config(&config);
    spawn_token_sweeper(state.clone());

    let app = build_router(state.clone());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(%addr, "climb-hub listening");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
    {
        error!(%err, "server exited with error");
    }
}

/// Periodic sweep of expired spectator/operator tokens, the way the
/// teacher's resilience primitives run their own background maintenance
/// tasks rather than sweeping inline on every request.
fn spawn_token_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            state.auth.sweep_expired();
        }
    });
}

/// Waits for Ctrl+C or SIGTERM, then quiesces every box (spec.md §5): take
/// each box's lock in turn, emit a terminal `STATE_SNAPSHOT` carrying a
/// shutdown reason, then drop the box so its subscribers' hub channels close
/// and their connection tasks exit with a normal close frame.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, quiescing boxes");
    state.dispatcher.quiesce_all("server_shutdown");
}
