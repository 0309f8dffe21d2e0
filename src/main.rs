//! webhook-relay server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

use webhook_relay::config::RelayConfig;
use webhook_relay::telemetry::init_telemetry;
use webhook_relay::{
    server, Dispatcher, HttpTransport, InMemoryStorage, Pipeline, SignatureValidator, Storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::load().context("failed to load configuration")?;
    init_telemetry(&config.telemetry)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting webhook relay");

    let storage = init_storage(&config).await?;
    let transport = HttpTransport::new(config.dispatcher.request_timeout(), &config.dispatcher.user_agent)
        .context("failed to build HTTP client")?;
    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher.to_dispatcher_config(),
        storage.clone(),
        Arc::new(transport),
    ));

    let mut validator = SignatureValidator::new();
    if let Some(secret) = &config.fallback_signature_secret {
        validator = validator.with_fallback_secret(secret.clone());
    }
    let mut pipeline = Pipeline::new(storage, dispatcher.clone()).with_validator(validator);
    if config.source_cache {
        pipeline = pipeline.with_source_cache();
    }

    let app = server::router(Arc::new(pipeline));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    dispatcher.shutdown().await;
    info!("shut down gracefully");
    Ok(())
}

async fn init_storage(config: &RelayConfig) -> Result<Arc<dyn Storage>> {
    if let Some(url) = &config.database_url {
        return connect_postgres(url).await;
    }

    let storage = InMemoryStorage::new();
    config.seed.apply(&storage).await;
    info!(
        sources = config.seed.sources.len(),
        targets = config.seed.targets.len(),
        routes = config.seed.routes.len(),
        "using in-memory storage"
    );
    Ok(Arc::new(storage))
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str) -> Result<Arc<dyn Storage>> {
    let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
        .await
        .context("failed to connect to postgres")?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(error = %err, "postgres connection closed");
        }
    });
    let storage = webhook_relay::PostgresStorage::new(client)
        .await
        .context("failed to prepare postgres schema")?;
    info!("using postgres storage");
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_url: &str) -> Result<Arc<dyn Storage>> {
    anyhow::bail!("database_url is set but this build lacks the `postgres` feature")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
