use crate::metrics::Metrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warp::Filter;

/// Serves `/metrics` (Prometheus text format) and `/health` until the
/// cancellation token trips.
pub fn serve_metrics(metrics: Arc<Metrics>, port: u16, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let metrics_route = warp::path!("metrics").map(move || {
            warp::reply::with_header(
                metrics.gather(),
                "Content-Type",
                "text/plain; version=0.0.4",
            )
        });
        let health_route = warp::path!("health").map(|| "ok");

        let (addr, server) = warp::serve(metrics_route.or(health_route))
            .bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
                cancel_token.cancelled().await;
                info!("Shutdown signal received, stopping metrics server...");
            });

        info!("Metrics server listening on {}", addr);
        server.await;
    });
}
