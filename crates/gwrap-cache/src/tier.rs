use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use gwrap_protocol::gemini::GenerateContentResponse;
use gwrap_storage::RequestStore;

use crate::fast::FastCache;

const SLOW_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Lookaside cache over two backends: the fast tier is authoritative for
/// latency, the slow tier (the audit store) for presence across restarts.
/// Only successful responses ever enter either tier; eligibility is the
/// caller's decision.
pub struct CacheTier {
    fast: FastCache,
    slow: Arc<RequestStore>,
}

impl CacheTier {
    pub fn new(fast: FastCache, slow: Arc<RequestStore>) -> Self {
        Self { fast, slow }
    }

    pub async fn lookup(&self, fingerprint: &str) -> Option<GenerateContentResponse> {
        if let Some(hit) = self.fast.get(fingerprint).await {
            debug!(fingerprint, "fast tier hit");
            return Some(hit);
        }

        let lookup = self.slow.find_cached(fingerprint);
        let hit = match tokio::time::timeout(SLOW_LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(err)) => {
                warn!(error = %err, "slow tier lookup failed, treating as miss");
                None
            }
            Err(_) => {
                warn!("slow tier lookup timed out, treating as miss");
                None
            }
        }?;

        debug!(fingerprint, "slow tier hit, promoting");
        self.fast.set(fingerprint, &hit).await;
        Some(hit)
    }

    /// Write-through after a successful upstream call. Fast tier only: the
    /// slow tier is populated as a side effect of audit logging.
    pub async fn store(&self, fingerprint: &str, response: &GenerateContentResponse) {
        self.fast.set(fingerprint, response).await;
    }
}
