//! Document store collaborator
//!
//! The service holds one store handle for the process lifetime: connected
//! before the listener accepts traffic and closed after it stops. The
//! admission, timeout and logging layers never touch it; only the routes and
//! the health endpoint do.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryDocumentStore;
pub use redis_store::RedisDocumentStore;

use crate::config::DatabaseConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;

/// A named set of JSON documents keyed by id
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn find_one(&self, id: &str) -> Result<Option<Value>>;

    /// Insert or replace the document stored under `id`
    async fn insert_one(&self, id: &str, document: &Value) -> Result<()>;
}

/// Connection lifecycle and collection lookup
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name, safe to log
    fn backend(&self) -> &'static str;

    async fn connect(&self) -> Result<()>;

    /// Look up a collection by name; `None` selects the configured default.
    /// Fails with [`GatewayError::NotConnected`] outside connect/close.
    async fn collection(&self, name: Option<&str>) -> Result<Box<dyn Collection>>;

    /// Round-trip to the backend, used by the readiness endpoint
    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Build the store selected by the URI scheme
pub fn store_from_config(config: &DatabaseConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.scheme() {
        "memory" => Ok(Arc::new(MemoryDocumentStore::new(config.collection.clone()))),
        "redis" | "rediss" => Ok(Arc::new(RedisDocumentStore::new(
            config.uri.expose_secret(),
            config.name.clone(),
            config.collection.clone(),
        )?)),
        other => Err(GatewayError::Config(format!(
            "Unsupported database scheme: '{}'",
            other
        ))),
    }
}
