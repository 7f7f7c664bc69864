use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use status_relay::config::Settings;
use status_relay::connection_manager::ConnectionRegistry;
use status_relay::server::{create_app, AppState};
use status_relay::shutdown::{GracefulShutdown, ShutdownSignal};
use status_relay::tasks::RegistrySweeper;
use status_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let state = AppState::new(settings.clone())?;
    tracing::info!(
        backend = state.broker.backend_name(),
        channel = %state.notify_channel(),
        delivery_mode = ?settings.broker.delivery_mode,
        "Application state initialized"
    );

    // Broker subscription feeding the dispatcher
    let subscription_handle = {
        let broker = state.broker.clone();
        let dispatcher = state.dispatcher.clone();
        let channel = state.notify_channel();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            broker.subscribe(&channel, dispatcher.as_ref(), &shutdown).await;
        })
    };

    let sweeper = RegistrySweeper::new(
        Duration::from_secs(settings.websocket.sweep_interval.max(1)),
        state.registry.clone(),
        state.shutdown.clone(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    let signal_handle = tokio::spawn(shutdown_on_signal(
        state.registry.clone(),
        state.shutdown.clone(),
    ));

    let app = create_app(state.clone());

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let shutdown = state.shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await;

    if let Err(ref e) = served {
        tracing::error!(error = %e, "Server stopped unexpectedly");
        signal_handle.abort();
        GracefulShutdown::new(state.registry.clone(), state.shutdown.clone())
            .execute("server error")
            .await;
    } else {
        let _ = signal_handle.await;
    }

    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(subscription_handle, sweeper_handle);

    tracing::info!("Server shutdown complete");
    served?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then drain connections
async fn shutdown_on_signal(registry: Arc<ConnectionRegistry>, shutdown: ShutdownSignal) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    };
    tracing::info!(reason, "Received shutdown signal, initiating graceful shutdown");

    GracefulShutdown::new(registry, shutdown).execute(reason).await;
}
