use serde::Deserialize;
use serde_json::Value;

use crate::config::{GenerationConfig, ProviderSettings};
use crate::providers::{Payload, Provider};
use crate::{LinguaError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug)]
pub struct OpenAi {
    base_url: String,
}

impl OpenAi {
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
}

impl Default for OpenAi {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for OpenAi {
    fn name(&self) -> &str {
        "openai"
    }

    fn request_url(&self, _model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request.bearer_auth(api_key)
    }

    fn build_body(&self, model: &str, payload: &Payload, generation: &GenerationConfig) -> Value {
        let content = match payload {
            Payload::Text { prompt } => Value::String(prompt.clone()),
            Payload::Inline {
                mime_type,
                data,
                instruction,
            } => serde_json::json!([
                { "type": "text", "text": instruction },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime_type};base64,{data}") }
                }
            ]),
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": content }]
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(temperature) = generation.temperature {
                obj.insert("temperature".to_string(), serde_json::json!(temperature));
            }
            if let Some(top_p) = generation.top_p {
                obj.insert("top_p".to_string(), serde_json::json!(top_p));
            }
        }
        body
    }

    fn parse_response(&self, body: Value) -> Result<String> {
        let parsed: ChatCompletionResponse = serde_json::from_value(body)?;
        let choice = parsed.choices.first().ok_or_else(|| {
            LinguaError::InvalidResponse("openai response has no choices".to_string())
        })?;
        let text = choice
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                LinguaError::InvalidResponse("openai choice has no message content".to_string())
            })?;
        Ok(text.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_chat_completions_url() {
        let provider = OpenAi::new();
        assert_eq!(
            provider.request_url("gpt-4o-mini"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn inline_payload_becomes_a_data_url() {
        let provider = OpenAi::new();
        let payload = Payload::Inline {
            mime_type: "image/jpeg".to_string(),
            data: "Zm9v".to_string(),
            instruction: "transcribe".to_string(),
        };
        let body = provider.build_body("gpt-4o-mini", &payload, &GenerationConfig::default());
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "transcribe");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,Zm9v"
        );
    }

    #[test]
    fn sampling_params_skip_top_k() {
        let provider = OpenAi::new();
        let generation = GenerationConfig {
            temperature: Some(0.1),
            top_p: None,
            top_k: Some(40),
        };
        let body = provider.build_body("gpt-4o-mini", &Payload::text("hi"), &generation);
        assert_eq!(body["temperature"], 0.1);
        assert!(body.get("top_p").is_none());
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn parses_first_choice_content() {
        let provider = OpenAi::new();
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hallo" } }]
        });
        assert_eq!(provider.parse_response(body).unwrap(), "hallo");
    }

    #[test]
    fn empty_choices_is_an_invalid_response() {
        let provider = OpenAi::new();
        let err = provider
            .parse_response(serde_json::json!({ "choices": [] }))
            .unwrap_err();
        assert!(matches!(err, LinguaError::InvalidResponse(_)));
    }
}
