use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mirror_pipeline::{
    app_state::AppState,
    backends,
    config::AppConfig,
    routes,
    services::{
        notifier::{LogNotifier, Notifier, WebhookNotifier},
        orchestrator::Orchestrator,
        transport::status_channel,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing mirror-pipeline");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    tokio::fs::create_dir_all(&config.work_root)
        .await
        .expect("Failed to create work root");

    let registry = backends::registry_from_config(&config).expect("Failed to initialize backends");
    tracing::info!(
        downloaders = ?registry.downloader_names(),
        uploaders = ?registry.uploader_names(),
        "Backends registered"
    );

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            tracing::info!("Completion notices go to the configured webhook");
            Arc::new(WebhookNotifier::new(url).expect("Failed to initialize webhook notifier"))
        }
        None => Arc::new(LogNotifier),
    };

    let (transport, listener) = status_channel();
    let orchestrator = Orchestrator::new(
        config.orchestrator(),
        transport.clone(),
        registry,
        notifier,
    );

    // Nothing works without the listener, so a bind failure is fatal
    let tcp = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    let status_listener = listener.start(Arc::new(orchestrator.clone()));

    let state = AppState::new(orchestrator, transport);
    let app = routes::router(state).merge(routes::metrics::router(prometheus_handle));

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    status_listener.stop().await;
    tracing::info!("mirror-pipeline stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
