use serde::{Deserialize, Serialize};

use crate::gemini::types::{Content, GenerationConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateContentPath {
    /// Bare model name, without the `models/` prefix.
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequestBody {
    /// Required. The content of the current conversation with the model.
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequestBody {
    /// Explicit temperature if supplied, else the API default of 1.0.
    pub fn effective_temperature(&self) -> f64 {
        self.generation_config
            .as_ref()
            .and_then(|config| config.temperature)
            .unwrap_or(1.0)
    }

    /// True when any part carries inline binary data.
    pub fn has_inline_data(&self) -> bool {
        self.contents
            .iter()
            .flat_map(|content| content.parts.iter())
            .any(|part| part.inline_data.is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateContentRequest {
    pub path: GenerateContentPath,
    pub body: GenerateContentRequestBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_null_options_deserialize_as_absent() {
        let body: GenerateContentRequestBody = serde_json::from_str(
            r#"{"contents":[{"parts":[{"text":"hi"}]}],"generationConfig":{"temperature":null}}"#,
        )
        .unwrap();
        let config = body.generation_config.as_ref().unwrap();
        assert!(config.temperature.is_none());
        // Reserialization drops the null entirely.
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn effective_temperature_defaults_to_one() {
        let body: GenerateContentRequestBody =
            serde_json::from_str(r#"{"contents":[{"parts":[{"text":"hi"}]}]}"#).unwrap();
        assert_eq!(body.effective_temperature(), 1.0);

        let body: GenerateContentRequestBody = serde_json::from_str(
            r#"{"contents":[],"generationConfig":{"temperature":0.2}}"#,
        )
        .unwrap();
        assert_eq!(body.effective_temperature(), 0.2);
    }
}
