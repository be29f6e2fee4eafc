use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use time::OffsetDateTime;

use gwrap_cache::{CacheTier, FastCache};
use gwrap_common::{CostsConfig, ModelConfig};
use gwrap_core::pipeline::{CacheStatus, ProxyEngine};
use gwrap_core::upstream::{GeminiClient, UpstreamCall, UpstreamTransport};
use gwrap_core::CostModel;
use gwrap_pool::KeyPool;
use gwrap_protocol::gemini::{GenerateContentRequestBody, GenerateContentResponse};
use gwrap_storage::{AuditSink, KeySource, RequestStore};

/// Transport answering every credential with the same scripted call.
struct StubTransport {
    call: UpstreamCall,
    credentials: Mutex<Vec<String>>,
}

impl StubTransport {
    fn new(call: UpstreamCall) -> Arc<Self> {
        Arc::new(Self {
            call,
            credentials: Mutex::new(Vec::new()),
        })
    }

    fn success() -> Arc<Self> {
        let response = serde_json::from_str(
            r#"{
                "candidates": [{"content": {"parts": [{"text": "six"}], "role": "model"}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
            }"#,
        )
        .unwrap();
        Self::new(UpstreamCall {
            response,
            status: 200,
            error: None,
        })
    }

    fn call_count(&self) -> usize {
        self.credentials.lock().unwrap().len()
    }

    fn credentials(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }
}

impl UpstreamTransport for StubTransport {
    fn send<'a>(
        &'a self,
        _model: &'a str,
        _body: &'a GenerateContentRequestBody,
        credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = UpstreamCall> + Send + 'a>> {
        self.credentials.lock().unwrap().push(credential.to_string());
        let call = self.call.clone();
        Box::pin(async move { call })
    }
}

struct Harness {
    engine: ProxyEngine,
    store: Arc<RequestStore>,
    // Keeps the sqlite file and key CSV alive for the test's duration.
    _dir: TempDir,
}

async fn harness(transport: Arc<dyn UpstreamTransport>, max_cost: f64) -> Harness {
    let dir = TempDir::new().unwrap();

    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("audit.db").display());
    let store = Arc::new(RequestStore::connect(&dsn).await.unwrap());
    store.sync().await.unwrap();

    // Nothing listens on this port; the fast tier degrades to misses and the
    // slow tier carries the cache.
    let fast = FastCache::new("redis://127.0.0.1:1", Duration::from_secs(60)).unwrap();
    let cache = CacheTier::new(fast, store.clone());

    let csv_path = dir.path().join("keys.csv");
    std::fs::write(
        &csv_path,
        "key,provider,active,working_models,checked_at\n\
         pool-key,gemini,true,gemini-2.0-flash,2025-01-01\n",
    )
    .unwrap();
    let pool = Arc::new(KeyPool::load(&csv_path).unwrap());

    let cost = CostModel::from_config(&CostsConfig {
        max_cost,
        models: vec![
            ModelConfig {
                name: "gemini-2.0-flash".to_string(),
                input: 0.10,
                output: 0.40,
            },
            ModelConfig {
                name: "gemini-2.5-pro".to_string(),
                input: 1.25,
                output: 10.0,
            },
        ],
    });

    let engine = ProxyEngine::new(
        cost,
        cache,
        GeminiClient::new(transport, pool),
        AuditSink::new(store.clone()),
        0.3,
    );
    Harness {
        engine,
        store,
        _dir: dir,
    }
}

async fn wait_for_rows(store: &RequestStore, count: i64) {
    for _ in 0..200 {
        let stats = store.stats(OffsetDateTime::UNIX_EPOCH).await.unwrap();
        if stats.total_requests >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("audit trail never reached {count} rows");
}

fn body(raw: &str) -> Bytes {
    Bytes::from(raw.to_string())
}

const DETERMINISTIC: &str = r#"{"contents":[{"parts":[{"text":"what is 3+3? answer in one word"}]}],"generationConfig":{"temperature":0.1}}"#;

#[tokio::test]
async fn miss_then_slow_tier_hit_with_single_upstream_call() {
    let transport = StubTransport::success();
    let h = harness(transport.clone(), 0.0).await;

    let first = h
        .engine
        .handle("gemini-2.0-flash:generateContent", None, body(DETERMINISTIC))
        .await
        .unwrap();
    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(first.key_source, KeySource::Pool);
    let expected_input = 10.0 * 0.10 / 1e6;
    let expected_output = 5.0 * 0.40 / 1e6;
    assert!((first.cost.input - expected_input).abs() < 1e-12);
    assert!((first.cost.output - expected_output).abs() < 1e-12);
    assert!((first.cost.total - (expected_input + expected_output)).abs() < 1e-12);

    // The slow tier only serves what the audit writer has persisted.
    wait_for_rows(&h.store, 1).await;

    let second = h
        .engine
        .handle("gemini-2.0-flash:generateContent", None, body(DETERMINISTIC))
        .await
        .unwrap();
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(second.body, first.body);
    assert_eq!(transport.call_count(), 1);

    wait_for_rows(&h.store, 2).await;
    let stats = h.store.stats(OffsetDateTime::UNIX_EPOCH).await.unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successful_requests, 2);
    assert_eq!(stats.cache_hits, 1);

    // Newest row is the hit: zero duration, no upstream involvement.
    let page = h.store.recent(1, 10).await.unwrap();
    let hit = &page.requests[0];
    assert!(hit.cache_hit);
    assert_eq!(hit.duration_ms, 0);
    assert!(hit.success);
}

#[tokio::test]
async fn high_temperature_always_misses() {
    let transport = StubTransport::success();
    let h = harness(transport.clone(), 0.0).await;
    let raw = r#"{"contents":[{"parts":[{"text":"tell me a random fact"}]}],"generationConfig":{"temperature":0.9}}"#;

    for _ in 0..2 {
        let reply = h
            .engine
            .handle("gemini-2.0-flash:generateContent", None, body(raw))
            .await
            .unwrap();
        assert_eq!(reply.cache_status, CacheStatus::Miss);
    }
    // No caching at 0.9: both requests went upstream.
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn cost_gate_rejects_before_upstream() {
    let transport = StubTransport::success();
    let h = harness(transport.clone(), 1.0).await;

    let long_text = "a".repeat(50_000);
    let raw = format!(
        r#"{{"contents":[{{"parts":[{{"text":"{long_text}"}}]}}],"generationConfig":{{"maxOutputTokens":100000}}}}"#
    );
    let err = h
        .engine
        .handle("gemini-2.5-pro:generateContent", None, body(&raw))
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 402);

    let parsed: serde_json::Value = serde_json::from_slice(&err.body).unwrap();
    assert!(parsed["error"].is_string());
    assert!(parsed["predicted_cost"].as_f64().unwrap() > 1.0);
    assert_eq!(parsed["max_cost"].as_f64().unwrap(), 1.0);

    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn parse_and_gate_rejections_are_400() {
    let transport = StubTransport::success();
    let h = harness(transport.clone(), 0.0).await;
    let valid = r#"{"contents":[{"parts":[{"text":"hi"}]}]}"#;

    let err = h
        .engine
        .handle("invalid-model:generateContent", None, body(valid))
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 400);
    let parsed: serde_json::Value = serde_json::from_slice(&err.body).unwrap();
    assert!(parsed["error"].as_str().unwrap().contains("invalid-model"));

    let err = h
        .engine
        .handle("gemini-2.0-flash:embedContent", None, body(valid))
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 400);

    let err = h
        .engine
        .handle("gemini-2.0-flash:generateContent", None, body("{not json"))
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 400);

    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn user_key_is_forwarded_and_recorded() {
    let transport = StubTransport::success();
    let h = harness(transport.clone(), 0.0).await;

    let reply = h
        .engine
        .handle(
            "gemini-2.0-flash:generateContent",
            Some("caller-key"),
            body(DETERMINISTIC),
        )
        .await
        .unwrap();
    assert_eq!(reply.key_source, KeySource::User);
    assert_eq!(transport.credentials(), ["caller-key"]);

    wait_for_rows(&h.store, 1).await;
    let page = h.store.recent(1, 10).await.unwrap();
    assert_eq!(page.requests[0].key_source, "user");
}

#[tokio::test]
async fn vision_requests_are_flagged_in_the_audit_trail() {
    let transport = StubTransport::success();
    let h = harness(transport.clone(), 0.0).await;
    let raw = r#"{"contents":[{"parts":[{"text":"describe"},{"inlineData":{"mimeType":"image/jpeg","data":"aGVsbG8="}}]}],"generationConfig":{"temperature":0.1}}"#;

    h.engine
        .handle("gemini-2.0-flash:generateContent", None, body(raw))
        .await
        .unwrap();

    wait_for_rows(&h.store, 1).await;
    let page = h.store.recent(1, 10).await.unwrap();
    assert!(page.requests[0].is_vision);
}

#[tokio::test]
async fn structured_upstream_errors_pass_through_verbatim() {
    let response: GenerateContentResponse = serde_json::from_str(
        r#"{"error":{"code":503,"message":"overloaded","status":"UNAVAILABLE"}}"#,
    )
    .unwrap();
    let transport = StubTransport::new(UpstreamCall {
        response,
        status: 503,
        error: Some("upstream returned 503".to_string()),
    });
    let h = harness(transport.clone(), 0.0).await;

    let err = h
        .engine
        .handle("gemini-2.0-flash:generateContent", None, body(DETERMINISTIC))
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 503);
    let parsed: serde_json::Value = serde_json::from_slice(&err.body).unwrap();
    assert_eq!(parsed["error"]["code"], 503);
    assert_eq!(parsed["error"]["status"], "UNAVAILABLE");

    // Failures are audited but never cached.
    wait_for_rows(&h.store, 1).await;
    let stats = h.store.stats(OffsetDateTime::UNIX_EPOCH).await.unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 0);

    let second = h
        .engine
        .handle("gemini-2.0-flash:generateContent", None, body(DETERMINISTIC))
        .await;
    assert!(second.is_err());
}
