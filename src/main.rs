use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use room_relay::config::Settings;
use room_relay::fanout::FanoutSubscriber;
use room_relay::server::{create_app, AppState};
use room_relay::shutdown::GracefulShutdown;
use room_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.log, &settings.otel)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone());
    tracing::info!(
        instance = %state.instance_name,
        fanout = state.relay.fanout().backend_type().as_str(),
        "Application state initialized"
    );

    // Start fan-out subscriber in background
    let subscriber_handle = if state.relay.fanout().is_enabled() {
        let subscriber = FanoutSubscriber::new(
            settings.fanout.clone(),
            state.relay.clone(),
            state.fanout_health.clone(),
            state.shutdown_tx.subscribe(),
        );
        Some(tokio::spawn(subscriber.run()))
    } else {
        None
    };

    let shutdown = GracefulShutdown::new(
        state.relay.clone(),
        state.shutdown_tx.clone(),
        state.connection_tasks.clone(),
        Duration::from_secs(settings.shutdown.drain_timeout_secs),
    );

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Upgraded sockets are detached from the HTTP server, so drain them
    // before letting it stop
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal().await;
            shutdown.execute(reason).await;
        })
        .await?;

    if let Some(handle) = subscriber_handle {
        tracing::info!("Waiting for fan-out subscriber to finish...");
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves with a description of the signal that was received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "interrupt"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "terminate"
        }
    }
}
