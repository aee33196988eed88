use std::future::{ready, Future};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use health::HealthRegistry;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::{debug, info};

use crate::cache::ClearableCache;
use crate::metrics_consts::CACHE_DROPPED;

/// Routes of the side channel HTTP server. `/metrics` is only mounted when a
/// recorder handle is given.
pub fn app(
    cache: Arc<dyn ClearableCache>,
    liveness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let mut router = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/dropcache", post(move || drop_cache(cache.clone())))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    if let Some(handle) = metrics {
        router = router.route("/metrics", get(move || ready(handle.render())));
    }

    router.layer(axum::middleware::from_fn(track_metrics))
}

async fn healthcheck() -> StatusCode {
    debug!("health check endpoint");
    StatusCode::OK
}

async fn drop_cache(cache: Arc<dyn ClearableCache>) -> StatusCode {
    cache.clear();
    metrics::counter!(CACHE_DROPPED).increment(1);
    info!("dedup cache dropped");
    StatusCode::OK
}

/// Bind a `TcpListener` on the provided bind address and serve `router` on it
/// until `shutdown` resolves.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("http server graceful shutdown complete");
    Ok(())
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
