use super::{Collection, DocumentStore};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Documents = HashMap<String, Value>;

/// In-process document store for tests and local runs
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    default_collection: String,
    collections: Arc<RwLock<HashMap<String, Documents>>>,
    connected: Arc<AtomicBool>,
    reachable: Arc<AtomicBool>,
}

impl MemoryDocumentStore {
    pub fn new(default_collection: impl Into<String>) -> Self {
        Self {
            default_collection: default_collection.into(),
            collections: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the backend going away (or coming back)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Database(
                "memory store unreachable".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn collection(&self, name: Option<&str>) -> Result<Box<dyn Collection>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }

        Ok(Box::new(MemoryCollection {
            name: name.unwrap_or(&self.default_collection).to_string(),
            collections: self.collections.clone(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Database(
                "memory store unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryCollection {
    name: String,
    collections: Arc<RwLock<HashMap<String, Documents>>>,
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(&self.name)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn insert_one(&self, id: &str, document: &Value) -> Result<()> {
        self.collections
            .write()
            .entry(self.name.clone())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }
}
