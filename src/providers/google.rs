use serde::Deserialize;
use serde_json::Value;

use crate::config::{GenerationConfig, ProviderSettings};
use crate::providers::{Payload, Provider};
use crate::{LinguaError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct Google {
    base_url: String,
}

impl Google {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut out = Self::new();
        if let Some(base_url) = settings.base_url.as_deref().filter(|s| !s.trim().is_empty()) {
            out = out.with_base_url(base_url);
        }
        out
    }

    fn model_path(model: &str) -> String {
        let model = model.trim();
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }
}

impl Default for Google {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for Google {
    fn name(&self) -> &str {
        "gemini"
    }

    fn request_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = Self::model_path(model);
        format!("{base}/{path}:generateContent")
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request.header("x-goog-api-key", api_key)
    }

    // The model is addressed by the URL, not the body.
    fn build_body(&self, _model: &str, payload: &Payload, generation: &GenerationConfig) -> Value {
        let parts = match payload {
            Payload::Text { prompt } => vec![serde_json::json!({ "text": prompt })],
            Payload::Inline {
                mime_type,
                data,
                instruction,
            } => vec![
                serde_json::json!({ "text": instruction }),
                serde_json::json!({
                    "inlineData": { "mimeType": mime_type, "data": data }
                }),
            ],
        };

        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts }]
        });

        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = generation.temperature {
            generation_config.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(top_p) = generation.top_p {
            generation_config.insert("topP".to_string(), serde_json::json!(top_p));
        }
        if let Some(top_k) = generation.top_k {
            generation_config.insert("topK".to_string(), serde_json::json!(top_k));
        }
        if !generation_config.is_empty() {
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "generationConfig".to_string(),
                    Value::Object(generation_config),
                );
            }
        }

        body
    }

    fn parse_response(&self, body: Value) -> Result<String> {
        let parsed: GoogleGenerateResponse = serde_json::from_value(body)?;
        let candidate = parsed.candidates.first().ok_or_else(|| {
            LinguaError::InvalidResponse("google response has no candidates".to_string())
        })?;
        let text = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| {
                parts
                    .iter()
                    .find_map(|part| part.get("text").and_then(Value::as_str))
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                LinguaError::InvalidResponse("google candidate has no text part".to_string())
            })?;
        Ok(text.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GoogleGenerateResponse {
    #[serde(default)]
    candidates: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_generate_content_url() {
        let provider = Google::new();
        assert_eq!(
            provider.request_url("gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            provider
                .with_base_url("http://localhost:9999/v1beta/")
                .request_url("models/custom"),
            "http://localhost:9999/v1beta/models/custom:generateContent"
        );
    }

    #[test]
    fn text_body_carries_generation_config() {
        let provider = Google::new();
        let generation = GenerationConfig {
            temperature: Some(0.2),
            top_p: Some(0.9),
            top_k: Some(40),
        };
        let body = provider.build_body("gemini-2.0-flash", &Payload::text("bonjour"), &generation);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "bonjour");
        assert_eq!(body["generationConfig"]["temperature"], 0.2);
        assert_eq!(body["generationConfig"]["topP"], 0.9);
        assert_eq!(body["generationConfig"]["topK"], 40);
    }

    #[test]
    fn default_generation_config_is_omitted() {
        let provider = Google::new();
        let body =
            provider.build_body("gemini-2.0-flash", &Payload::text("hi"), &GenerationConfig::default());
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn inline_body_uses_inline_data_part() {
        let provider = Google::new();
        let payload = Payload::Inline {
            mime_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
            instruction: "read the text in this image".to_string(),
        };
        let body = provider.build_body("gemini-2.0-flash", &payload, &GenerationConfig::default());
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "read the text in this image");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "aGVsbG8=");
    }

    #[test]
    fn parses_first_candidate_text() {
        let provider = Google::new();
        let body = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "salut" }] }
            }]
        });
        assert_eq!(provider.parse_response(body).unwrap(), "salut");
    }

    #[test]
    fn missing_candidates_is_an_invalid_response() {
        let provider = Google::new();
        let err = provider
            .parse_response(serde_json::json!({ "candidates": [] }))
            .unwrap_err();
        assert!(matches!(err, LinguaError::InvalidResponse(_)));

        let err = provider
            .parse_response(serde_json::json!({
                "candidates": [{ "content": { "parts": [] } }]
            }))
            .unwrap_err();
        assert!(matches!(err, LinguaError::InvalidResponse(_)));
    }
}
