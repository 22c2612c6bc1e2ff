//! Per-request deadline.
//!
//! The downstream pipeline runs in its own task. If it has not produced a
//! response by the deadline the client gets a 408 and the task is left to
//! finish on its own; its late response is dropped.

use crate::correlation::set_correlation_header;
use crate::lifecycle::RequestLifecycle;
use crate::metrics;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use tracing::{error, warn};

/// Deadline applied to every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

impl RequestTimeout {
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }
}

/// Axum middleware enforcing [`RequestTimeout`]
pub async fn timeout_middleware(
    State(RequestTimeout(deadline)): State<RequestTimeout>,
    mut request: Request,
    next: Next,
) -> Response {
    let lifecycle = RequestLifecycle::get_or_insert(&mut request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut downstream = tokio::spawn(next.run(request));

    tokio::select! {
        joined = &mut downstream => {
            return match joined {
                Ok(response) => {
                    lifecycle.complete(response.status());
                    response
                }
                Err(e) => {
                    error!(
                        error = %e,
                        method = %method,
                        path = %path,
                        "Request handler task failed"
                    );
                    lifecycle.complete(StatusCode::INTERNAL_SERVER_ERROR);
                    internal_error_response()
                }
            };
        }
        _ = tokio::time::sleep(deadline) => {}
    }

    // The downstream may have completed in the instant before the deadline
    // fired; its response is then on its way and must be the one sent.
    if !lifecycle.complete(StatusCode::REQUEST_TIMEOUT) {
        return match downstream.await {
            Ok(response) => response,
            Err(_) => internal_error_response(),
        };
    }

    let correlation_id = lifecycle.correlation_id();
    warn!(
        correlation_id = correlation_id.as_deref().unwrap_or("-"),
        method = %method,
        path = %path,
        timeout_ms = deadline.as_millis() as u64,
        "Request timeout"
    );
    metrics::record_request_timeout();

    let mut response = timeout_response();
    if let Some(id) = correlation_id {
        set_correlation_header(&mut response, &id);
    }
    response
}

/// 408 response sent when the deadline passes
pub fn timeout_response() -> Response {
    (
        StatusCode::REQUEST_TIMEOUT,
        Json(json!({
            "error": "Request Timeout",
            "detail": "The request exceeded the maximum allowed time",
        })),
    )
        .into_response()
}

fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal Server Error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(timeout_ms: u64, handler_ms: u64, finished: Arc<AtomicBool>) -> Router {
        Router::new()
            .route(
                "/slow",
                get(move || async move {
                    tokio::time::sleep(Duration::from_millis(handler_ms)).await;
                    finished.store(true, Ordering::SeqCst);
                    "done"
                }),
            )
            .layer(middleware::from_fn_with_state(
                RequestTimeout::from_millis(timeout_ms),
                timeout_middleware,
            ))
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/slow")
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_gets_408_and_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let response = app(100, 500, finished.clone())
            .oneshot(request())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(!finished.load(Ordering::SeqCst));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Request Timeout");
        assert!(value["detail"].is_string());

        // the handler is not aborted
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_passes_through() {
        let finished = Arc::new(AtomicBool::new(false));
        let response = app(100, 10, finished.clone())
            .oneshot(request())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_handler_yields_500() {
        let app = Router::new()
            .route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("handler failure");
                    }
                    "unreachable"
                }),
            )
            .layer(middleware::from_fn_with_state(
                RequestTimeout::from_millis(1000),
                timeout_middleware,
            ));

        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/boom")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
