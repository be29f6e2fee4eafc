use std::time::Instant;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, warn};

use gwrap_cache::CacheTier;
use gwrap_protocol::gemini::{
    GenerateContentPath, GenerateContentRequest, GenerateContentRequestBody,
    GenerateContentResponse,
};
use gwrap_storage::{AuditRecord, AuditSink, KeySource};

use crate::cost::{Cost, CostModel};
use crate::error::ProxyError;
use crate::fingerprint;
use crate::upstream::GeminiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Successful terminal state of a request; the router turns this into a 200
/// with the cost and cache headers.
#[derive(Debug)]
pub struct ProxyReply {
    pub cost: Cost,
    pub cache_status: CacheStatus,
    pub key_source: KeySource,
    pub body: Bytes,
}

/// Per-request orchestration: parse, gate, cache lookup or upstream call,
/// audit dispatch. One call to `handle` terminates in exactly one
/// `ProxyReply` or `ProxyError`.
pub struct ProxyEngine {
    cost: CostModel,
    cache: CacheTier,
    client: GeminiClient,
    audit: AuditSink,
    max_temp: f64,
}

impl ProxyEngine {
    pub fn new(
        cost: CostModel,
        cache: CacheTier,
        client: GeminiClient,
        audit: AuditSink,
        max_temp: f64,
    ) -> Self {
        Self {
            cost,
            cache,
            client,
            audit,
            max_temp,
        }
    }

    pub fn model_names(&self) -> &[String] {
        self.cost.model_names()
    }

    /// `name` is the `{model}:{action}` tail of the request path; `user_key`
    /// is the caller's own credential from the query string, if any.
    pub async fn handle(
        &self,
        name: &str,
        user_key: Option<&str>,
        payload: Bytes,
    ) -> Result<ProxyReply, ProxyError> {
        let (model, action) = split_model_action(name)?;
        if action != "generateContent" {
            return Err(ProxyError::bad_request(
                "only generateContent action is supported",
            ));
        }

        let Some(entry) = self.cost.lookup(model) else {
            return Err(ProxyError::bad_request(format!(
                "model '{model}' not allowed, only models defined in config are permitted"
            )));
        };

        let request: GenerateContentRequestBody = serde_json::from_slice(&payload)
            .map_err(|err| ProxyError::bad_request(format!("invalid request body: {err}")))?;

        let predicted = entry.predict(&request);
        if !self.cost.allow(predicted) {
            info!(model, predicted, max_cost = self.cost.max_cost(), "cost gate rejected request");
            return Err(ProxyError::cost_denied(predicted, self.cost.max_cost()));
        }

        let temperature = request.effective_temperature();
        let cache_eligible = temperature <= self.max_temp;
        let request_hash = fingerprint::hash(&request);
        let key_source = match user_key {
            Some(key) if !key.is_empty() => KeySource::User,
            _ => KeySource::Pool,
        };

        if cache_eligible && let Some(cached) = self.cache.lookup(&request_hash).await {
            let usage = cached.usage();
            let cost = entry.posterior(&usage);
            info!(model, request_hash = %request_hash, saved = cost.total, "cache hit");
            let body = encode(&cached)?;

            let mut record = self.audit_base(model, &request, temperature, key_source, &request_hash);
            record.response = Some(cached);
            record.success = true;
            record.cache_hit = true;
            record.cost_input = cost.input;
            record.cost_output = cost.output;
            record.cost_total = cost.total;
            record.prompt_tokens = usage.prompt_token_count;
            record.output_tokens = usage.candidates_token_count;
            record.total_tokens = usage.total_token_count;
            self.audit.record(record);

            return Ok(ProxyReply {
                cost,
                cache_status: CacheStatus::Hit,
                key_source,
                body,
            });
        }

        let started = Instant::now();
        let upstream_request = GenerateContentRequest {
            path: GenerateContentPath {
                model: model.to_string(),
            },
            body: request.clone(),
        };
        let call = self.client.generate(&upstream_request, user_key).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        if call.is_success() {
            let usage = call.response.usage();
            let cost = entry.posterior(&usage);
            if cache_eligible {
                self.cache.store(&request_hash, &call.response).await;
            }
            let body = encode(&call.response)?;

            let mut record = self.audit_base(model, &request, temperature, key_source, &request_hash);
            record.response = Some(call.response);
            record.success = true;
            record.cost_input = cost.input;
            record.cost_output = cost.output;
            record.cost_total = cost.total;
            record.duration_ms = duration_ms;
            record.prompt_tokens = usage.prompt_token_count;
            record.output_tokens = usage.candidates_token_count;
            record.total_tokens = usage.total_token_count;
            self.audit.record(record);

            return Ok(ProxyReply {
                cost,
                cache_status: CacheStatus::Miss,
                key_source,
                body,
            });
        }

        let message = call
            .error
            .clone()
            .unwrap_or_else(|| format!("upstream returned {}", call.status));
        warn!(model, status = call.status, error = %message, "upstream call failed");

        let mut record = self.audit_base(model, &request, temperature, key_source, &request_hash);
        record.status_code = call.status;
        record.error = Some(message.clone());
        record.duration_ms = duration_ms;
        self.audit.record(record);

        // A structured upstream error body is returned verbatim; otherwise a
        // minimal envelope around the message.
        let body = if call.response.error.as_ref().is_some_and(|error| error.code != 0) {
            encode(&call.response)?
        } else {
            Bytes::from(serde_json::json!({ "error": message }).to_string())
        };
        Err(ProxyError::upstream(call.status, body))
    }

    fn audit_base(
        &self,
        model: &str,
        request: &GenerateContentRequestBody,
        temperature: f64,
        key_source: KeySource,
        request_hash: &str,
    ) -> AuditRecord {
        AuditRecord {
            timestamp: OffsetDateTime::now_utc(),
            model: model.to_string(),
            request: request.clone(),
            response: None,
            status_code: 200,
            success: false,
            error: None,
            cost_input: 0.0,
            cost_output: 0.0,
            cost_total: 0.0,
            temperature,
            key_source,
            cache_hit: false,
            request_hash: request_hash.to_string(),
            duration_ms: 0,
            prompt_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            is_vision: request.has_inline_data(),
        }
    }
}

fn split_model_action(name: &str) -> Result<(&str, &str), ProxyError> {
    name.trim_start_matches('/')
        .split_once(':')
        .filter(|(model, action)| !model.is_empty() && !action.is_empty())
        .ok_or_else(|| ProxyError::bad_request("invalid path format, expected /model:action"))
}

fn encode(response: &GenerateContentResponse) -> Result<Bytes, ProxyError> {
    serde_json::to_vec(response)
        .map(Bytes::from)
        .map_err(|err| ProxyError::internal(format!("failed to encode response: {err}")))
}
