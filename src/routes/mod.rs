//! nUDM HTTP surface: readiness plus the UE authentication routes the
//! admission layer protects.

use crate::db::DocumentStore;
use crate::error::{GatewayError, Result};
use crate::rate_limit::{rate_limit_middleware, RateLimitMiddleware};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Collection authentication events are written to
pub const AUTH_EVENTS_COLLECTION: &str = "auth-events";

/// Body and path field carrying the subscriber identity
const SUBJECT_FIELD: &str = "supiOrSuci";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

/// Build the service routes.
///
/// Everything under `protected_prefix` passes through admission control;
/// `/health` does not.
pub fn router(state: AppState, limiter: RateLimitMiddleware, protected_prefix: &str) -> Router {
    let protected = Router::new()
        .route(
            "/:supiOrSuci/security-information",
            get(security_information),
        )
        .route("/:supiOrSuci/auth-events", post(create_auth_event))
        .route("/auth-events", post(create_auth_event_from_body))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .route("/health", get(health))
        .nest(protected_prefix, protected)
        .with_state(state)
}

/// Readiness: 200 while the document store answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!(error = %e, backend = state.store.backend(), "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

async fn security_information(
    State(state): State<AppState>,
    Path(supi_or_suci): Path<String>,
) -> Result<Json<Value>> {
    let subscribers = state.store.collection(None).await?;

    subscribers
        .find_one(&supi_or_suci)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("Subscriber {} not found", supi_or_suci)))
}

async fn create_auth_event(
    State(state): State<AppState>,
    Path(supi_or_suci): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse> {
    store_auth_event(&state, supi_or_suci, body).await
}

async fn create_auth_event_from_body(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse> {
    let supi_or_suci = body
        .get(SUBJECT_FIELD)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::BadRequest(format!("Missing '{}'", SUBJECT_FIELD)))?;

    store_auth_event(&state, supi_or_suci, body).await
}

async fn store_auth_event(
    state: &AppState,
    supi_or_suci: String,
    body: Value,
) -> Result<(StatusCode, Json<Value>)> {
    let mut event = match body {
        Value::Object(map) => map,
        _ => {
            return Err(GatewayError::BadRequest(
                "Authentication event must be a JSON object".to_string(),
            ))
        }
    };

    let id = Uuid::new_v4().to_string();
    event.insert(SUBJECT_FIELD.to_string(), Value::String(supi_or_suci.clone()));
    event.insert("id".to_string(), Value::String(id.clone()));

    let events = state.store.collection(Some(AUTH_EVENTS_COLLECTION)).await?;
    events.insert_one(&id, &Value::Object(event)).await?;

    debug!(supi_or_suci = %supi_or_suci, event_id = %id, "Authentication event stored");

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}
