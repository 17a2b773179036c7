use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use bookmark_realtime::config::Settings;
use bookmark_realtime::relay::create_relay;
use bookmark_realtime::server::{create_app, AppState};
use bookmark_realtime::shutdown::GracefulShutdown;
use bookmark_realtime::tasks::HeartbeatTask;
use bookmark_realtime::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("loading configuration")?;
    let _telemetry = init_telemetry(&settings.otel)?;

    // Redis when configured and reachable, in-process otherwise
    let relay = create_relay(&settings.relay).await;
    let state = AppState::new(settings.clone(), relay);
    // Subscribe before the first client arrives; earlier publishes are held
    state.gateway.ensure_started();
    tracing::info!(
        relay = state.relay.backend_name(),
        topic = %settings.relay.topic,
        "Gateway state ready"
    );

    let (tasks_stop, _) = broadcast::channel::<()>(1);
    let heartbeat = tokio::spawn(
        HeartbeatTask::new(
            settings.websocket.clone(),
            state.registry.clone(),
            tasks_stop.subscribe(),
        )
        .run(),
    );
    let shutdown = GracefulShutdown::new(state.gateway.clone(), tasks_stop);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "Shutdown requested");
            // Live connections get their close frame before the listener stops
            shutdown.execute(signal).await;
        })
        .await?;

    let _ = heartbeat.await;
    tracing::info!("Stopped");
    Ok(())
}

/// Resolves with the name of the first termination signal received
async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
