use super::types::RateLimitConfig;
use crate::error::{GatewayError, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header, Method},
};
use http_body_util::LengthLimitError;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Sentinel used when the client address is not available
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Largest body inspected for a subject identifier
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Derives the rate limit key of a request: the client address, qualified
/// by the subject identifier when the request names one.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    subject_params: Vec<String>,
    subject_body_field: String,
    body_limit: usize,
}

impl IdentifierResolver {
    pub fn new(subject_params: Vec<String>, subject_body_field: impl Into<String>) -> Self {
        Self {
            subject_params,
            subject_body_field: subject_body_field.into(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.subject_params.clone(),
            config.subject_body_field.clone(),
        )
    }

    /// Cap on the number of body bytes buffered while looking for a subject
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Resolve the key for `request`.
    ///
    /// Path parameters take precedence over the body. The body is only read
    /// for JSON requests that carry one; it is handed back intact inside the
    /// returned request. A body over the limit is
    /// [`GatewayError::PayloadTooLarge`], one that cannot be read is
    /// [`GatewayError::BadRequest`].
    pub async fn resolve(
        &self,
        params: Option<&HashMap<String, String>>,
        request: Request,
    ) -> Result<(String, Request)> {
        let address = client_address(&request);

        if let Some(subject) = params.and_then(|p| self.subject_from_params(p)) {
            return Ok((compose(&address, Some(&subject)), request));
        }

        if !carries_json_body(&request) {
            return Ok((compose(&address, None), request));
        }

        let (subject, request) = self.subject_from_request_body(request).await?;
        Ok((compose(&address, subject.as_deref()), request))
    }

    /// First non-empty configured path parameter
    pub fn subject_from_params(&self, params: &HashMap<String, String>) -> Option<String> {
        self.subject_params
            .iter()
            .filter_map(|name| params.get(name))
            .find(|value| !value.is_empty())
            .cloned()
    }

    /// Subject field of a JSON object body
    pub fn subject_from_body(&self, body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value
            .get(&self.subject_body_field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    async fn subject_from_request_body(
        &self,
        request: Request,
    ) -> Result<(Option<String>, Request)> {
        let (parts, body) = request.into_parts();

        match axum::body::to_bytes(body, self.body_limit).await {
            Ok(bytes) => {
                let subject = self.subject_from_body(&bytes);
                debug!(has_subject = subject.is_some(), "Inspected request body for subject");
                Ok((subject, Request::from_parts(parts, Body::from(bytes))))
            }
            Err(e) if exceeds_length_limit(&e) => {
                warn!(limit = self.body_limit, "Request body over limit");
                Err(GatewayError::PayloadTooLarge(format!(
                    "Request body exceeds {} bytes",
                    self.body_limit
                )))
            }
            Err(e) => {
                warn!(error = %e, "Failed to read request body for rate limit key");
                Err(GatewayError::BadRequest(format!(
                    "Failed to read request body: {}",
                    e
                )))
            }
        }
    }
}

impl Default for IdentifierResolver {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Client IP from the connection info, or [`UNKNOWN_CLIENT`]
pub fn client_address(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// `address` or `address:subject`
pub fn compose(address: &str, subject: Option<&str>) -> String {
    match subject {
        Some(subject) => format!("{}:{}", address, subject),
        None => address.to_string(),
    }
}

fn exceeds_length_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

fn carries_json_body(request: &Request) -> bool {
    let method = request.method();
    if !(method == Method::POST || method == Method::PUT || method == Method::PATCH) {
        return false;
    }

    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
}
