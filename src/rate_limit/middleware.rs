use super::identifier::IdentifierResolver;
use super::store::LimiterStore;
use super::types::RateLimitResult;
use crate::metrics;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("ratelimit-remaining");
pub const RATE_LIMIT_RESET_HEADER: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Admission middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    /// Shared limiter store
    store: Arc<LimiterStore>,
    /// Request to key resolution
    resolver: Arc<IdentifierResolver>,
}

impl RateLimitMiddleware {
    /// Create a new admission middleware over `store`
    pub fn new(store: Arc<LimiterStore>, resolver: IdentifierResolver) -> Self {
        Self {
            store,
            resolver: Arc::new(resolver),
        }
    }

    pub fn store(&self) -> &Arc<LimiterStore> {
        &self.store
    }

    /// Decide on a request, handing it back when admitted
    pub async fn apply(
        &self,
        params: Option<&HashMap<String, String>>,
        request: Request,
    ) -> Result<(Request, RateLimitResult), Response> {
        let (identifier, request) = self
            .resolver
            .resolve(params, request)
            .await
            .map_err(IntoResponse::into_response)?;
        let result = self.store.evaluate(&identifier);

        if !result.allowed {
            let reason = result.rejection.map(|r| r.as_str()).unwrap_or("unknown");
            warn!(
                identifier = %identifier,
                reason = reason,
                retry_after = result.retry_after.unwrap_or(1),
                "Rate limit exceeded"
            );
            metrics::record_admission_rejected(reason);

            return Err(create_rate_limit_response(&result));
        }

        debug!(
            identifier = %identifier,
            remaining = result.remaining,
            "Rate limit check passed"
        );

        Ok((request, result))
    }
}

/// Create a 429 Too Many Requests response with rate limit headers
fn create_rate_limit_response(result: &RateLimitResult) -> Response {
    let retry_after = result.retry_after.unwrap_or(1).max(1);

    let mut headers = HeaderMap::new();
    insert_rate_limit_headers(&mut headers, result);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));

    let body = Json(json!({
        "error": "Too Many Requests",
        "message": "Rate limit exceeded. Please try again later.",
        "retryAfter": retry_after,
    }));

    (StatusCode::TOO_MANY_REQUESTS, headers, body).into_response()
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(result.limit));
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(result.remaining));
    headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from(result.reset_after));
}

/// Axum middleware function for admission control.
///
/// Mount with `route_layer` so path parameters are available.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitMiddleware>,
    params: Option<Path<HashMap<String, String>>>,
    request: Request,
    next: Next,
) -> Response {
    let params = params.map(|Path(p)| p);

    match limiter.apply(params.as_ref(), request).await {
        Ok((request, result)) => {
            let response = next.run(request).await;
            add_rate_limit_headers(response, &result)
        }
        Err(response) => response,
    }
}

/// Add rate limit headers to admitted responses
pub fn add_rate_limit_headers(mut response: Response, result: &RateLimitResult) -> Response {
    insert_rate_limit_headers(response.headers_mut(), result);
    response
}
