use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::warn;

use gwrap_protocol::gemini::{GenerateContentRequestBody, GenerateContentResponse};

use crate::store::RequestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    User,
    Pool,
}

impl KeySource {
    pub fn as_str(self) -> &'static str {
        match self {
            KeySource::User => "user",
            KeySource::Pool => "pool",
        }
    }
}

/// One row of the audit trail; every terminated request produces exactly one.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: OffsetDateTime,
    pub model: String,
    pub request: GenerateContentRequestBody,
    pub response: Option<GenerateContentResponse>,
    pub status_code: u16,
    pub success: bool,
    pub error: Option<String>,
    pub cost_input: f64,
    pub cost_output: f64,
    pub cost_total: f64,
    /// Effective temperature (explicit value or the 1.0 default).
    pub temperature: f64,
    pub key_source: KeySource,
    pub cache_hit: bool,
    pub request_hash: String,
    pub duration_ms: i64,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub is_vision: bool,
}

/// Best-effort asynchronous persistence of audit records.
///
/// `record` spawns a detached task, so in-flight writes survive the request
/// handler returning (or the client disconnecting) and never block the hot
/// path. Failures and timeouts are logged and dropped; there is no retry
/// queue.
#[derive(Clone)]
pub struct AuditSink {
    store: Arc<RequestStore>,
    write_timeout: Duration,
}

impl AuditSink {
    pub fn new(store: Arc<RequestStore>) -> Self {
        Self {
            store,
            write_timeout: Duration::from_secs(5),
        }
    }

    pub fn record(&self, record: AuditRecord) {
        let store = self.store.clone();
        let write_timeout = self.write_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(write_timeout, store.append(record)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "failed to persist audit record"),
                Err(_) => warn!("audit record write timed out"),
            }
        });
    }
}
