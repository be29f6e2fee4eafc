use serde::{Deserialize, Serialize};

use crate::gemini::types::{Candidate, ErrorDetail, UsageMetadata};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl GenerateContentResponse {
    pub fn usage(&self) -> UsageMetadata {
        self.usage_metadata.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_roundtrip() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"error":{"code":403,"message":"forbidden","status":"PERMISSION_DENIED"}}"#,
        )
        .unwrap();
        let error = resp.error.as_ref().unwrap();
        assert_eq!(error.code, 403);
        assert_eq!(error.status, "PERMISSION_DENIED");
        assert!(resp.candidates.is_empty());
        assert_eq!(resp.usage(), UsageMetadata::default());
    }
}
