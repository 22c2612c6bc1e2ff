use super::{Collection, DocumentStore};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Redis-backed document store.
///
/// Each collection is the hash `<database>:<collection>`; documents are
/// stored as JSON strings under their id.
pub struct RedisDocumentStore {
    client: redis::Client,
    database: String,
    default_collection: String,
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisDocumentStore {
    /// Create an unconnected store. Only parses the URL.
    pub fn new(url: &str, database: String, default_collection: String) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GatewayError::Config(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            database,
            default_collection,
            connection: RwLock::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(GatewayError::NotConnected)
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let mut connection = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| GatewayError::Database(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await?;

        *self.connection.write().await = Some(connection);
        info!(database = %self.database, "Connected to Redis document store");
        Ok(())
    }

    async fn collection(&self, name: Option<&str>) -> Result<Box<dyn Collection>> {
        let connection = self.connection().await?;
        let name = name.unwrap_or(&self.default_collection).to_string();

        Ok(Box::new(RedisCollection {
            key: format!("{}:{}", self.database, name),
            name,
            connection,
        }))
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.connection.write().await.take().is_some() {
            debug!("Redis document store connection released");
        }
        Ok(())
    }
}

struct RedisCollection {
    name: String,
    key: String,
    connection: ConnectionManager,
}

#[async_trait]
impl Collection for RedisCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, id: &str) -> Result<Option<Value>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.hget(&self.key, id).await?;

        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(GatewayError::from)
    }

    async fn insert_one(&self, id: &str, document: &Value) -> Result<()> {
        let mut connection = self.connection.clone();
        let encoded = serde_json::to_string(document)?;
        connection.hset::<_, _, _, ()>(&self.key, id, encoded).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let result = RedisDocumentStore::new("not a url", "udm".into(), "subscribers".into());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_collection_before_connect() {
        let store =
            RedisDocumentStore::new("redis://127.0.0.1:6379", "udm".into(), "subscribers".into())
                .unwrap();
        assert!(matches!(
            store.collection(None).await,
            Err(GatewayError::NotConnected)
        ));
        assert!(store.ping().await.is_err());
        assert!(store.close().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_round_trip() {
        let store =
            RedisDocumentStore::new("redis://127.0.0.1:6379", "udm-test".into(), "subscribers".into())
                .unwrap();
        store.connect().await.expect("Failed to connect to Redis");

        let collection = store.collection(None).await.unwrap();
        let doc = serde_json::json!({ "authType": "5G_AKA" });
        collection.insert_one("imsi-001", &doc).await.unwrap();
        assert_eq!(collection.find_one("imsi-001").await.unwrap(), Some(doc));

        store.close().await.unwrap();
    }
}
