use crate::correlation::get_correlation_id;
use crate::lifecycle::RequestLifecycle;
use crate::metrics;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Placeholder logged when no correlation identifier was assigned
const NO_CORRELATION_ID: &str = "-";

/// Middleware emitting a structured record when a request arrives and
/// another when it completes.
///
/// Completion is hooked on the request lifecycle, so a 408 synthesized by the
/// timeout layer is logged with that status and the handler's late response
/// is not logged again.
pub async fn access_log_middleware(mut req: Request, next: Next) -> Response {
    let lifecycle = RequestLifecycle::get_or_insert(&mut req);
    let correlation_id = get_correlation_id(&req)
        .or_else(|| lifecycle.correlation_id())
        .unwrap_or_else(|| NO_CORRELATION_ID.to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let started = Instant::now();

    info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        query = %query,
        "Request received"
    );

    lifecycle.on_complete(move |status| {
        let elapsed = started.elapsed();
        info!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
        metrics::record_request(method.as_str(), status.as_u16(), elapsed.as_secs_f64());
    });

    let response = next.run(req).await;
    lifecycle.complete(response.status());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_completes_lifecycle_with_response_status() {
        let lifecycle = RequestLifecycle::new();
        let app = Router::new()
            .route("/teapot", get(|| async { StatusCode::IM_A_TEAPOT }))
            .layer(middleware::from_fn(access_log_middleware));

        let mut request = http::Request::builder()
            .uri("/teapot?x=1")
            .body(axum::body::Body::empty())
            .unwrap();
        request.extensions_mut().insert(lifecycle.clone());

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(lifecycle.status(), Some(StatusCode::IM_A_TEAPOT));
    }

    #[tokio::test]
    async fn test_does_not_override_earlier_completion() {
        let lifecycle = RequestLifecycle::new();
        lifecycle.complete(StatusCode::REQUEST_TIMEOUT);

        let app = Router::new()
            .route("/", get(|| async { "late" }))
            .layer(middleware::from_fn(access_log_middleware));

        let mut request = http::Request::builder()
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        request.extensions_mut().insert(lifecycle.clone());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(lifecycle.status(), Some(StatusCode::REQUEST_TIMEOUT));
    }
}
