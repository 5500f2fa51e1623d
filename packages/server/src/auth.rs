//! Bearer-token guard for the admin routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

use api::admin::json_error;

/// Expected admin token; `None` refuses every request.
#[derive(Debug, Clone)]
pub struct AdminToken(Option<Arc<str>>);

impl AdminToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(Arc::from))
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }
}

pub async fn require_admin_token(
    State(expected): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected.0.as_deref() else {
        return json_error(
            StatusCode::FORBIDDEN,
            "admin_disabled",
            "ADMIN_TOKEN is not set",
        );
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        });

    match token.map(|token| token == expected) {
        Some(true) => next.run(request).await,
        Some(false) => json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid bearer token"),
        None => json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token"),
    }
}
