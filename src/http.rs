//! HTTP server for the Prometheus metrics endpoint.
//!
//! Runs on a separate tokio task and serves `/metrics` for Prometheus scraping.
//! It only reads the registry, so it keeps serving the last known values
//! while the database is unreachable.

use crate::metrics::MetricRegistry;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler(State(registry): State<Arc<MetricRegistry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        registry.encode(),
    )
}

fn router(registry: Arc<MetricRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Bind the metrics listener on `0.0.0.0:port`.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await
}

/// Serve `/metrics` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, registry: Arc<MetricRegistry>, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Prometheus HTTP server listening");
    }

    let result = axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "HTTP server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn get(port: u16, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_registry() {
        let registry = Arc::new(MetricRegistry::new().unwrap());
        registry.set_scalar(metrics::ALL_USERS, Some(1234.0)).unwrap();
        registry
            .set_labeled(metrics::QUIZ_ATTEMPTS, &["3".to_string()], 9.0)
            .unwrap();

        let listener = bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::clone(&registry), shutdown.clone()));

        let response = get(port, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("text/plain; version=0.0.4"));
        assert!(response.contains("# TYPE moodle_all_user_counter gauge"));
        assert!(response.contains("moodle_all_user_counter 1234"));
        assert!(response.contains(r#"moodle_quiz_attempts{quizid="3"} 9"#));

        let response = get(port, "/").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        shutdown.cancel();
        server.await.unwrap();
    }
}
