use std::process::ExitCode;
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::{eyre, Result};
use health::HealthRegistry;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use import_reporter::{
    cache::MemoryCache,
    config::Config,
    consumer::{Consumer, ShutdownOutcome},
    dataset_api::DatasetApiClient,
    handler::Handler,
    kafka::KafkaTransport,
    receiver::Receiver,
    server,
};

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_tracing();
    info!("starting import reporter");

    let config = Config::init_from_env()?;
    info!(?config, "loaded configuration");

    let dataset_api = Arc::new(DatasetApiClient::new(
        &config.dataset_api_url,
        &config.service_auth_token,
        &config.dataset_api_auth_token,
        config.dataset_api_timeout_ms.0,
    )?);
    let cache = Arc::new(MemoryCache::new(config.cache_size));

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness =
        liveness.register("consumer".to_string(), config.liveness_deadline_ms.0);

    let recorder_handle = server::setup_metrics_recorder()?;
    let app = server::app(cache.clone(), liveness.clone(), Some(recorder_handle));
    let server_shutdown = CancellationToken::new();
    let bind = config.bind();
    let mut http_server = {
        let shutdown = server_shutdown.clone();
        tokio::spawn(async move {
            server::serve(app, &bind, async move { shutdown.cancelled().await }).await
        })
    };

    let handler = Arc::new(Handler::new(
        dataset_api,
        cache,
        config.cache_expiry_secs,
    ));
    let receiver = Arc::new(Receiver::new(handler)?);

    let transport = Arc::new(KafkaTransport::new(&config.kafka)?);
    let mut transport_errors = transport
        .take_errors()
        .ok_or_else(|| eyre!("kafka transport errors already taken"))?;

    let mut consumer = Consumer::new(
        transport,
        receiver,
        consumer_liveness,
        config.liveness_interval_ms.0,
        config.graceful_shutdown_timeout_ms.0,
    );
    consumer.listen();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut failed = false;
    let mut server_finished = false;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        Some(e) = transport_errors.recv() => {
            error!(
                "kafka consumer received an unrecoverable error, shutting down: {:#}",
                eyre::Report::new(e)
            );
            failed = true;
        }
        result = &mut http_server => {
            server_finished = true;
            failed = true;
            match result {
                Ok(Ok(())) => error!("http server exited unexpectedly"),
                Ok(Err(e)) => error!("http server failed: {}", e),
                Err(e) => error!("http server task failed: {}", e),
            }
        }
    }

    let deadline = Instant::now() + config.graceful_shutdown_timeout_ms.0;

    let outcome = consumer
        .close(Some(deadline.saturating_duration_since(Instant::now())))
        .await;
    if outcome == ShutdownOutcome::Forced {
        warn!("consumer did not stop before the shutdown deadline");
    }

    server_shutdown.cancel();
    if !server_finished {
        match timeout_at(deadline, &mut http_server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("http server failed during shutdown: {}", e),
            Ok(Err(e)) => error!("http server task failed: {}", e),
            Err(_) => {
                warn!("timed out waiting for the http server to shut down");
                http_server.abort();
            }
        }
    }

    if failed {
        error!("import reporter shut down after a failure");
        return Ok(ExitCode::FAILURE);
    }
    info!("import reporter shut down gracefully");
    Ok(ExitCode::SUCCESS)
}
