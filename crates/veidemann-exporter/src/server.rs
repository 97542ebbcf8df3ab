//! HTTP surface: a landing page and the metrics endpoint.
//!
//! ```text
//! GET /              → HTML page linking to the metrics path
//! GET <metrics_path> → Registry::gather() as text/plain; version=0.0.4
//!                      503 + fatal channel on failure
//! ```

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::sync::mpsc;
use tracing::error;
use veidemann_metrics::{CONTENT_TYPE, CollectError, Registry};

#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    metrics_path: Arc<str>,
    fatal: mpsc::Sender<CollectError>,
}

impl AppState {
    /// `fatal` receives the error of every failed scrape; the process is
    /// expected to exit on the first one.
    pub fn new(registry: Arc<Registry>, metrics_path: &str, fatal: mpsc::Sender<CollectError>) -> Self {
        Self {
            registry,
            metrics_path: Arc::from(metrics_path),
            fatal,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let metrics_path = state.metrics_path.to_string();
    Router::new()
        .route("/", get(landing_page))
        .route(&metrics_path, get(metrics))
        .with_state(state)
}

async fn landing_page(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Veidemann Exporter</title></head>\n\
         <body>\n\
         <h1>Veidemann Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.metrics_path
    ))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.registry.gather().await {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            let message = e.to_string();
            error!(error = %message, "scrape failed");
            // Capacity is one; only the first failure needs to reach main.
            let _ = state.fatal.try_send(e);
            (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
        }
    }
}
