//! Admin HTTP surface: status, stats and manual enqueue.
//!
//! The router carries no authorization of its own; the host wraps it in
//! whatever layer it trusts.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;

use crate::error::QueueError;
use crate::service::QueueService;

pub fn router(service: QueueService) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/enqueue", post(enqueue))
        .with_state(service)
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn queue_error_to_response(err: QueueError) -> Response {
    match err {
        QueueError::Unavailable => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            "job queue is not configured",
        ),
        QueueError::InvalidPayload(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_payload", msg)
        }
        QueueError::Broker(e) => {
            tracing::error!("Broker error in admin request: {}", e);
            json_error(StatusCode::BAD_GATEWAY, "broker_error", e.to_string())
        }
        QueueError::Listener(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "listener_error", e.to_string())
        }
    }
}

async fn status(State(service): State<QueueService>) -> Response {
    axum::Json(service.status()).into_response()
}

async fn stats(State(service): State<QueueService>) -> Response {
    match service.stats().await {
        Ok(counts) => axum::Json(counts).into_response(),
        Err(e) => queue_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueQuery {
    name: Option<String>,
}

async fn enqueue(
    State(service): State<QueueService>,
    Query(query): Query<EnqueueQuery>,
    body: Bytes,
) -> Response {
    let QueueService::Enabled(producer) = &service else {
        return queue_error_to_response(QueueError::Unavailable);
    };
    let name = query
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| producer.queue().name().to_string());

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string()),
    };

    match service.enqueue_value(&name, payload).await {
        Ok(job) => (StatusCode::OK, axum::Json(job)).into_response(),
        Err(e) => queue_error_to_response(e),
    }
}
