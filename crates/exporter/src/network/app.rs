//! Exporter routes

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

const FRONT_PAGE: &str = concat!(
    "<html>",
    "<head><title>TEMPer Exporter</title></head>",
    "<body>",
    "<h1>TEMPer Exporter</h1>",
    "<p><a href=\"/metrics\">Metrics</a></p>",
    "</body>",
    "</html>",
);

/// `/` front page, `/metrics` exposition, 404 for everything else
#[derive(Clone)]
pub struct ExporterApp {
    registry: Registry,
}

impl ExporterApp {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(front_page))
            .route("/metrics", get(metrics))
            .fallback(not_found)
            .with_state(self)
    }

    /// Gather and encode the registry; reads every sensor
    fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut body = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut body)?;
        Ok(body)
    }
}

async fn front_page() -> Html<&'static str> {
    Html(FRONT_PAGE)
}

async fn metrics(State(app): State<ExporterApp>) -> Response {
    // Collection does blocking HID I/O
    match tokio::task::spawn_blocking(move || app.render()).await {
        Ok(Ok(body)) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Failed to encode metrics: {}", e);
            internal_error()
        }
        Err(e) => {
            error!("Metrics collection task failed: {}", e);
            internal_error()
        }
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found\r\n")
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\r\n").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use prometheus::{IntCounter, Opts};
    use tower::ServiceExt;

    fn app() -> Router {
        let registry = Registry::new();
        let counter = IntCounter::with_opts(Opts::new("test_total", "A test counter")).unwrap();
        counter.inc();
        registry.register(Box::new(counter)).unwrap();
        ExporterApp::new(registry).router()
    }

    async fn send(method: Method, uri: &str) -> (StatusCode, String, String) {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (
            status,
            content_type,
            String::from_utf8_lossy(&body).into_owned(),
        )
    }

    #[tokio::test]
    async fn test_front_page_links_metrics() {
        let (status, content_type, body) = send(Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("href=\"/metrics\""));
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let (status, content_type, body) = send(Method::GET, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("test_total 1"));
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let (status, _, body) = send(Method::GET, "/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not Found\r\n");
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let (status, _, _) = send(Method::POST, "/metrics").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _, body) = send(Method::HEAD, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }
}
