use sha2::{Digest, Sha256};

use gwrap_protocol::gemini::GenerateContentRequestBody;

/// SHA-256 of the canonical request serialization, hex-encoded.
///
/// Canonical form: the serde_json serialization of the typed request body.
/// Field order is fixed by the struct declarations and `None` optional
/// fields are omitted entirely, so a request carrying an explicit JSON
/// `null` canonicalizes identically to one where the field is absent, and
/// whitespace in the incoming document never matters. Changing this
/// serialization invalidates every existing cache entry.
pub fn hash(request: &GenerateContentRequestBody) -> String {
    let canonical =
        serde_json::to_vec(request).expect("request body serializes infallibly");
    hex::encode(Sha256::digest(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GenerateContentRequestBody {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn hash_is_deterministic() {
        let a = parse(r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#);
        assert_eq!(hash(&a), hash(&a));
        assert_eq!(hash(&a).len(), 64);
    }

    #[test]
    fn whitespace_and_explicit_nulls_do_not_matter() {
        let compact = parse(r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#);
        let noisy = parse(
            r#"{
                "contents": [ { "parts": [ { "text": "hello", "inlineData": null } ] } ],
                "generationConfig": null
            }"#,
        );
        assert_eq!(hash(&compact), hash(&noisy));
    }

    #[test]
    fn generation_parameters_change_the_hash() {
        let base = parse(r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#);
        let tempered = parse(
            r#"{"contents":[{"parts":[{"text":"hello"}]}],"generationConfig":{"temperature":0.1}}"#,
        );
        assert_ne!(hash(&base), hash(&tempered));
    }

    #[test]
    fn inline_data_changes_the_hash() {
        let text = parse(r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#);
        let vision = parse(
            r#"{"contents":[{"parts":[{"text":"hello"},{"inlineData":{"mimeType":"image/jpeg","data":"aGk="}}]}]}"#,
        );
        assert_ne!(hash(&text), hash(&vision));
    }
}
