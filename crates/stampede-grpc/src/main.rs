use std::sync::Arc;

use tonic::codec::CompressionEncoding;
use tonic::transport::Server;

use stampede_datastore::Datastore;
use stampede_grpc::{BackendHandler, Config, DatastoreType, RunnerType};
use stampede_proto::backend_server::BackendServer;
use stampede_runner::{DockerRunner, KubeRunner, LocalRunner, Runner};
use stampede_service::Backend;
use stampede_store::{Commands, EmbeddedCommands, RedisCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    config.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(config.max_level())
        .init();

    let commands: Arc<dyn Commands> = match config.datastore_type {
        DatastoreType::Redis => Arc::new(RedisCommands::connect(&config.redis_endpoint).await?),
        DatastoreType::Embedded => Arc::new(EmbeddedCommands::open()?),
    };

    let runner: Arc<dyn Runner> = match config.runner_type {
        RunnerType::Docker => Arc::new(DockerRunner::connect()?),
        RunnerType::Kube => Arc::new(KubeRunner::connect().await?),
        RunnerType::Local => Arc::new(LocalRunner::new()),
    };

    let backend = Arc::new(Backend::new(Datastore::new(commands.clone()), runner.clone()));
    let handler = BackendHandler::new(backend);

    let addr = config.listen_address.parse()?;
    tracing::debug!("server listening at {addr}");

    Server::builder()
        .add_service(
            BackendServer::new(handler)
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    tracing::debug!("tearing down");

    // Every teardown step runs; failures are collected and reported
    // together rather than masking each other.
    let mut failures = Vec::new();

    if let Err(e) = runner.teardown().await {
        failures.push(e.to_string());
    }

    if let Err(e) = commands.close().await {
        failures.push(e.to_string());
    }

    if !failures.is_empty() {
        anyhow::bail!("Teardown errors: {}", failures.join(","));
    }

    tracing::debug!("finished teardown");

    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::debug!("received SIGTERM, shutting down");
        },
    }
}
