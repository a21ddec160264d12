use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use lbship_observability::{PipelineMetrics, prometheus_exporter};
use lbship_pipeline::Dispatcher;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared state for the admin endpoint.
pub struct AdminState {
    pub metrics: Arc<PipelineMetrics>,
    pub dispatcher: Dispatcher,
    pub stop: watch::Receiver<bool>,
}

pub fn build_admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve until the stop signal flips.
pub async fn serve(addr: String, state: Arc<AdminState>) -> anyhow::Result<()> {
    let mut stop = state.stop.clone();
    let app = build_admin_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Admin endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await?;
    Ok(())
}

async fn health_check(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let draining = *state.stop.borrow();
    Json(json!({
        "status": if draining { "draining" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "queue": {
            "len": state.dispatcher.len(),
            "capacity": state.dispatcher.capacity(),
        },
        "workers_running": state.metrics.workers_running(),
    }))
}

async fn metrics_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, prometheus_exporter::content_type())],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use lbship_observability::Metric;
    use tower::ServiceExt;

    fn make_state(stopped: bool) -> (Arc<AdminState>, watch::Sender<bool>) {
        let metrics = Arc::new(PipelineMetrics::new(true).unwrap());
        let dispatcher = Dispatcher::new(8, Arc::clone(&metrics));
        let (tx, rx) = watch::channel(stopped);
        let state = Arc::new(AdminState {
            metrics,
            dispatcher,
            stop: rx,
        });
        (state, tx)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_queue() {
        let (state, _tx) = make_state(false);
        state.dispatcher.submit("line".into()).unwrap();
        let resp = build_admin_router(state).oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["queue"]["len"], 1);
        assert_eq!(body["queue"]["capacity"], 8);
    }

    #[tokio::test]
    async fn health_reports_draining() {
        let (state, _tx) = make_state(true);
        let resp = build_admin_router(state).oneshot(get_req("/health")).await.unwrap();
        let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_are_prometheus_text() {
        let (state, _tx) = make_state(false);
        state.metrics.inc(Metric::LinesDropped);
        let resp = build_admin_router(state).oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let text = body_string(resp).await;
        assert!(text.contains("lbship_lines_dropped_total 1"));
    }
}
