use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use wreq::{Client, Method};

use gwrap_pool::KeyPool;
use gwrap_protocol::gemini::{
    GenerateContentRequest, GenerateContentRequestBody, GenerateContentResponse,
};

/// Outcome of one upstream exchange. Transport failures are folded into a
/// synthesized 500 so the retry loop sees a uniform shape.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub response: GenerateContentResponse,
    pub status: u16,
    /// Present on any non-success outcome; forwarded into the audit record.
    pub error: Option<String>,
}

impl UpstreamCall {
    pub fn is_success(&self) -> bool {
        self.status == 200 && self.error.is_none()
    }

    fn failure(status: u16, message: String) -> Self {
        Self {
            response: GenerateContentResponse::default(),
            status,
            error: Some(message),
        }
    }
}

/// One HTTP exchange with the vendor. The credential rotation loop lives
/// above this seam.
pub trait UpstreamTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        model: &'a str,
        body: &'a GenerateContentRequestBody,
        credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = UpstreamCall> + Send + 'a>>;
}

pub struct WreqTransport {
    client: Client,
    base_url: String,
}

impl WreqTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn call(
        &self,
        model: &str,
        body: &GenerateContentRequestBody,
        credential: &str,
    ) -> UpstreamCall {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, credential
        );
        let payload = match serde_json::to_vec(body) {
            Ok(payload) => payload,
            Err(err) => {
                return UpstreamCall::failure(500, format!("failed to encode request: {err}"));
            }
        };

        let result = self
            .client
            .request(Method::POST, &url)
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await;
        let response = match result {
            Ok(response) => response,
            Err(err) => return UpstreamCall::failure(500, format!("upstream transport: {err}")),
        };

        let status = response.status().as_u16();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return UpstreamCall::failure(500, format!("upstream transport: {err}")),
        };

        if status != 200 {
            // Best-effort parse so the structured error envelope survives.
            let parsed: GenerateContentResponse =
                serde_json::from_slice(&bytes).unwrap_or_default();
            return UpstreamCall {
                response: parsed,
                status,
                error: Some(format!(
                    "upstream returned {status}: {}",
                    String::from_utf8_lossy(&bytes)
                )),
            };
        }

        match serde_json::from_slice(&bytes) {
            Ok(parsed) => UpstreamCall {
                response: parsed,
                status,
                error: None,
            },
            Err(err) => {
                UpstreamCall::failure(500, format!("failed to decode upstream response: {err}"))
            }
        }
    }
}

impl UpstreamTransport for WreqTransport {
    fn send<'a>(
        &'a self,
        model: &'a str,
        body: &'a GenerateContentRequestBody,
        credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = UpstreamCall> + Send + 'a>> {
        Box::pin(self.call(model, body, credential))
    }
}

/// 400 and 404 are the caller's problem; everything else, statuses we have
/// never seen included, gets another credential.
pub fn should_retry(status: u16) -> bool {
    match status {
        400 | 404 => false,
        403 | 429 | 500 | 502 | 503 | 504 => true,
        other => {
            debug!(status = other, "unrecognized upstream status, retrying");
            true
        }
    }
}

pub struct GeminiClient {
    transport: Arc<dyn UpstreamTransport>,
    pool: Arc<KeyPool>,
}

impl GeminiClient {
    pub fn new(transport: Arc<dyn UpstreamTransport>, pool: Arc<KeyPool>) -> Self {
        Self { transport, pool }
    }

    /// Single call when the caller supplied a credential; otherwise the
    /// rotation loop. The active count is snapshotted up front, so at most
    /// that many upstream calls happen even if other requests deactivate
    /// credentials concurrently, and each retry step burns at most one
    /// credential.
    pub async fn generate(
        &self,
        request: &GenerateContentRequest,
        user_key: Option<&str>,
    ) -> UpstreamCall {
        if let Some(key) = user_key.filter(|key| !key.is_empty()) {
            return self
                .transport
                .send(&request.path.model, &request.body, key)
                .await;
        }

        let total_keys = self.pool.active_count().await;
        let Some(mut credential) = self.pool.select().await else {
            return UpstreamCall::failure(
                401,
                "no api key provided and no keys available in pool".to_string(),
            );
        };
        let mut tried = 1usize;

        loop {
            let call = self
                .transport
                .send(&request.path.model, &request.body, &credential.key)
                .await;
            if call.is_success() {
                return call;
            }

            if !should_retry(call.status) {
                return call;
            }

            if call.status == 403 {
                match self.pool.deactivate(&credential.key).await {
                    Ok(()) => info!(
                        model = %request.path.model,
                        "deactivated credential after 403 from upstream"
                    ),
                    Err(err) => warn!(error = %err, "failed to deactivate credential"),
                }
            }

            if tried >= total_keys {
                return call;
            }
            warn!(
                status = call.status,
                tried,
                total_keys,
                "upstream call failed, rotating credential"
            );
            match self.pool.rotate(&credential.key).await {
                Some(next) => credential = next,
                None => return call,
            }
            tried += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert!(!should_retry(400));
        assert!(!should_retry(404));
        for status in [403, 429, 500, 502, 503, 504] {
            assert!(should_retry(status), "{status} should be retryable");
        }
        // Unknown statuses stay retryable.
        assert!(should_retry(418));
        assert!(should_retry(599));
    }
}
