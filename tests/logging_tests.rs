use async_trait::async_trait;
use axum::body::Body;
use http::{Request, StatusCode};
use nudm_gateway::{
    build_app,
    config::GatewayConfig,
    db::{Collection, DocumentStore, MemoryDocumentStore},
    error::Result,
    rate_limit::LimiterStore,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Log sink shared with the subscriber
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn records(&self) -> Vec<Value> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

fn with_message<'a>(records: &'a [Value], message: &str) -> Vec<&'a Value> {
    records
        .iter()
        .filter(|r| r["message"] == message)
        .collect()
}

/// Positions of `message` records tagged with `correlation_id`
fn positions(records: &[Value], message: &str, correlation_id: &str) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r["message"] == message && r["correlation_id"] == correlation_id)
        .map(|(i, _)| i)
        .collect()
}

fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .json()
        .flatten_event(true)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

/// Store whose lookups outlast the request deadline
struct SlowStore;

struct SlowCollection;

#[async_trait]
impl DocumentStore for SlowStore {
    fn backend(&self) -> &'static str {
        "slow"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn collection(&self, _name: Option<&str>) -> Result<Box<dyn Collection>> {
        Ok(Box::new(SlowCollection))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Collection for SlowCollection {
    fn name(&self) -> &str {
        "subscribers"
    }

    async fn find_one(&self, _id: &str) -> Result<Option<Value>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Some(json!({ "authType": "5G_AKA" })))
    }

    async fn insert_one(&self, _id: &str, _document: &Value) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_access_log_records_share_correlation_id() {
    let (logs, _guard) = capture_logs();

    let mut config = GatewayConfig::default();
    config.rate_limit.requests = 1;

    let memory = MemoryDocumentStore::new("subscribers");
    memory.connect().await.unwrap();
    let limiter = Arc::new(LimiterStore::new(config.rate_limit.clone()));
    let app = build_app(&config, Arc::new(memory), limiter, None);

    let request = || {
        Request::builder()
            .uri("/nudm-ueau/v1/imsi-1/security-information?probe=1")
            .body(Body::empty())
            .unwrap()
    };

    app.clone().oneshot(request()).await.unwrap();
    let response = app.oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let correlation_id = response
        .headers()
        .get("x-correlation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let records = logs.records();

    let received: Vec<_> = with_message(&records, "Request received")
        .into_iter()
        .filter(|r| r["correlation_id"] == correlation_id.as_str())
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["method"], "GET");
    assert_eq!(received[0]["path"], "/nudm-ueau/v1/imsi-1/security-information");
    assert_eq!(received[0]["query"], "probe=1");

    let completed: Vec<_> = with_message(&records, "Request completed")
        .into_iter()
        .filter(|r| r["correlation_id"] == correlation_id.as_str())
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["status"], 429);
    assert!(completed[0]["duration_ms"].is_u64());

    assert_eq!(with_message(&records, "Rate limit exceeded").len(), 1);
    assert_eq!(with_message(&records, "Rate limit backoff applied").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_logs_single_completion() {
    let (logs, _guard) = capture_logs();

    let mut config = GatewayConfig::default();
    config.server.request_timeout_ms = 100;

    let limiter = Arc::new(LimiterStore::new(config.rate_limit.clone()));
    let app = build_app(&config, Arc::new(SlowStore), limiter, None);

    let path = "/nudm-ueau/v1/imsi-1/security-information";
    let response = app
        .oneshot(
            Request::builder()
                .uri(path)
                .header("x-correlation-id", "slow-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let correlation_id = response
        .headers()
        .get("x-correlation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(correlation_id, "slow-1");

    // Let the abandoned handler finish before reading the logs
    tokio::time::sleep(Duration::from_millis(600)).await;
    let records = logs.records();

    let received = positions(&records, "Request received", &correlation_id);
    assert_eq!(received.len(), 1);

    let completed = positions(&records, "Request completed", &correlation_id);
    assert_eq!(completed.len(), 1);
    assert!(completed[0] > received[0]);
    assert_eq!(records[completed[0]]["status"], 408);
    assert_eq!(records[completed[0]]["path"], path);

    let timeouts = with_message(&records, "Request timeout");
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0]["correlation_id"], correlation_id.as_str());
    assert_eq!(timeouts[0]["method"], "GET");
    assert_eq!(timeouts[0]["path"], path);
    assert_eq!(timeouts[0]["timeout_ms"], 100);
}
