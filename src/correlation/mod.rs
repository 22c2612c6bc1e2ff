use crate::lifecycle::RequestLifecycle;
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Canonical correlation header, read first and echoed on every response
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Read when the canonical header is absent
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Inbound identifiers longer than this are replaced
pub const MAX_CORRELATION_ID_LEN: usize = 128;

/// Correlation ID extension type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound correlation identifier, or a fresh UUID v4
pub fn resolve_correlation_id(headers: &HeaderMap) -> String {
    [CORRELATION_ID_HEADER, REQUEST_ID_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|id| !id.is_empty() && id.len() <= MAX_CORRELATION_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Middleware to assign and propagate the correlation identifier
pub async fn correlation_id_middleware(mut req: Request, next: Next) -> Response {
    let correlation_id = resolve_correlation_id(req.headers());

    // Outer layers (timeout) read it from the lifecycle
    if let Some(lifecycle) = req.extensions().get::<RequestLifecycle>() {
        lifecycle.set_correlation_id(&correlation_id);
    }

    req.extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(req).await;

    set_correlation_header(&mut response, &correlation_id);
    response
}

/// Echo `correlation_id` on the response
pub fn set_correlation_header(response: &mut Response, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
}

/// Extract correlation ID from request extensions
pub fn get_correlation_id(req: &Request) -> Option<String> {
    req.extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
}
