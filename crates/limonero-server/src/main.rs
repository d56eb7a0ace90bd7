//! Limonero Server - Main entry point

use anyhow::Result;
use limonero_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use limonero_server::{
    api::{self, AppState},
    backend::{BackendOptions, BackendRegistry},
    catalog::{memory::MemoryCatalog, postgres::PgCatalog, Catalog},
    codec::CodecRegistry,
    config::Config,
    middleware::Authenticator,
    Gateway,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()?
        .with_file_prefix("limonero-server")
        .with_default_directives("limonero_server=debug,tower_http=debug,sqlx=info");
    init_logging(&log_config)?;

    info!("Starting Limonero gateway");

    let config = Config::load()?;
    info!(
        instance = %config.instance,
        "Configuration loaded - server will bind to {}:{}",
        config.host, config.gateway_port
    );

    let catalog: Arc<dyn Catalog> = if config.uses_memory_catalog() {
        info!("Using the in-memory catalog");
        Arc::new(MemoryCatalog::new())
    } else {
        let catalog = PgCatalog::connect(&config.database_url, config.database.max_connections).await?;
        info!("Database connection pool established");
        catalog.migrate().await?;
        info!("Database migrations completed");
        Arc::new(catalog)
    };

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let backends = BackendRegistry::new(BackendOptions {
        use_datanode_hostname: config.use_datanode_hostname,
        http: http.clone(),
    });

    let state = AppState {
        gateway: Gateway::new(config.instance.clone(), catalog, backends, CodecRegistry::new()),
        auth: Authenticator::new(config.secret.clone(), config.services.thorn.url.clone(), http),
        debug: config.debug,
    };
    let app = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.gateway_port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
