use std::sync::Arc;

use adguidsync::config::Configuration;
use adguidsync::telemetry;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| adguidsync::config::DEFAULT_CONFIG_PATH.into());
    let config = Configuration::read(path)?;

    // export logs and traces only when a collector is configured.
    let endpoint = config.telemetry.otlp_endpoint.as_deref();
    let otel_logs = endpoint.map(telemetry::setup_logging).transpose()?;
    let tracer = endpoint.map(telemetry::setup_tracer).transpose()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(otel_logs)
        .init();

    tracing::info!(path = %config.path().display(), "configuration loaded");

    let metrics = telemetry::setup_metrics_recorder()?;
    let state = adguidsync::initialize_state(Arc::clone(&config), Some(metrics)).await?;

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "server started");

    axum::serve(listener, adguidsync::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tracer) = tracer {
        if let Err(err) = tracer.shutdown() {
            tracing::warn!(error = %err, "tracer did not flush");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(err) => tracing::error!(error = %err, "cannot listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
