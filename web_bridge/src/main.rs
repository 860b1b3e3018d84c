use chassis_lib::{init_tracing, BridgeConfig};
use eyre::{Result, WrapErr};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use web_bridge::{gateway, AppState, MqttLink, MultiplexerHandle};

/// Inbound broker messages waiting for the multiplexer
const INBOUND_QUEUE: usize = 256;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    tracing::info!("Starting Web Bridge...");

    let config = BridgeConfig::load()?;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (link, broker_driver) = MqttLink::connect(&config.mqtt, inbound_tx)
        .await
        .wrap_err_with(|| format!("Failed to connect to broker {}", config.mqtt.broker_url))?;
    tracing::info!("Connected to broker {}", config.mqtt.broker_url);

    let (multiplexer, multiplexer_task) =
        MultiplexerHandle::spawn(link.clone(), config.mqtt.status_prefix.clone(), inbound_rx);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let state = Arc::new(AppState::new(config, link.clone(), multiplexer));
    let sweeper = state.spawn_session_sweeper();

    let app = gateway::router(state);

    tracing::info!("Binding web bridge to: {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Web bridge listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .wrap_err("HTTP server failed")?;

    sweeper.abort();
    multiplexer_task.abort();
    link.disconnect().await;
    broker_driver.abort();

    tracing::info!("Web bridge stopped");
    Ok(())
}
