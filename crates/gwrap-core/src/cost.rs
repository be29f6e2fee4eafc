use std::collections::HashMap;

use gwrap_common::CostsConfig;
use gwrap_protocol::gemini::{GenerateContentRequestBody, UsageMetadata};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Flat per-image token charge applied when a request carries inline data,
/// approximating the vendor's per-image billing.
const INLINE_DATA_TOKEN_SURCHARGE: u64 = 258;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

/// Unit prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
}

impl ModelCost {
    /// Actual cost of a finished response, from its usage block.
    pub fn posterior(&self, usage: &UsageMetadata) -> Cost {
        let input = f64::from(usage.prompt_token_count) * self.input / 1e6;
        let output = f64::from(usage.candidates_token_count) * self.output / 1e6;
        Cost {
            input,
            output,
            total: input + output,
        }
    }

    /// A-priori estimate used only by the admission gate. Prompt tokens are
    /// guessed as chars/4 plus a flat surcharge per vision request; the
    /// output side assumes the request's maxOutputTokens (default 8192) is
    /// fully spent.
    pub fn predict(&self, request: &GenerateContentRequestBody) -> f64 {
        let mut total_chars: u64 = 0;
        let mut has_inline_data = false;
        for content in &request.contents {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    total_chars += text.len() as u64;
                }
                if part.inline_data.is_some() {
                    has_inline_data = true;
                }
            }
        }

        let mut estimated_prompt_tokens = total_chars / 4;
        if has_inline_data {
            estimated_prompt_tokens += INLINE_DATA_TOKEN_SURCHARGE;
        }

        let max_output_tokens = request
            .generation_config
            .as_ref()
            .and_then(|config| config.max_output_tokens)
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);

        let input = estimated_prompt_tokens as f64 * self.input / 1e6;
        let output = f64::from(max_output_tokens) * self.output / 1e6;
        input + output
    }
}

/// Immutable price table plus the global policy ceiling. The table doubles
/// as the admission whitelist: unknown models are rejected up front.
#[derive(Debug, Clone)]
pub struct CostModel {
    models: HashMap<String, ModelCost>,
    names: Vec<String>,
    max_cost: f64,
}

impl CostModel {
    pub fn from_config(costs: &CostsConfig) -> Self {
        let models = costs
            .models
            .iter()
            .map(|model| {
                (
                    model.name.clone(),
                    ModelCost {
                        input: model.input,
                        output: model.output,
                    },
                )
            })
            .collect();
        let names = costs.models.iter().map(|model| model.name.clone()).collect();
        Self {
            models,
            names,
            max_cost: costs.max_cost,
        }
    }

    pub fn lookup(&self, model: &str) -> Option<ModelCost> {
        self.models.get(model).copied()
    }

    pub fn model_names(&self) -> &[String] {
        &self.names
    }

    pub fn max_cost(&self) -> f64 {
        self.max_cost
    }

    /// True when the gate is disabled (ceiling ≤ 0) or the estimate fits.
    pub fn allow(&self, predicted: f64) -> bool {
        self.max_cost <= 0.0 || predicted <= self.max_cost
    }
}
