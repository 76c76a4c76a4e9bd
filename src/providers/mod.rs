use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::config::{GenerationConfig, ProviderSettings};
use crate::{LinguaError, Result};

#[cfg(feature = "provider-google")]
pub mod google;
#[cfg(feature = "provider-openai")]
pub mod openai;

#[cfg(feature = "provider-google")]
pub use google::Google;
#[cfg(feature = "provider-openai")]
pub use openai::OpenAi;

/// One request body submitted by a collaborator. OCR and audio/video
/// transcription share the inline shape; only the mime type differs.
#[derive(Clone, Debug)]
pub enum Payload {
    Text {
        prompt: String,
    },
    Inline {
        mime_type: String,
        /// Base64-encoded content.
        data: String,
        instruction: String,
    },
}

impl Payload {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self::Text {
            prompt: prompt.into(),
        }
    }

    pub fn inline_from_bytes(
        mime_type: impl Into<String>,
        bytes: &[u8],
        instruction: impl Into<String>,
    ) -> Self {
        Self::Inline {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
            instruction: instruction.into(),
        }
    }
}

/// Everything provider-specific about one HTTP round trip: where to send it,
/// how to authenticate, what the body looks like, and how to pull the text
/// out of the response. The orchestrator owns the transport.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn request_url(&self, model: &str) -> String;
    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder;
    fn build_body(
        &self,
        model: &str,
        payload: &Payload,
        generation: &GenerationConfig,
    ) -> serde_json::Value;
    fn parse_response(&self, body: serde_json::Value) -> Result<String>;
}

pub fn from_config(name: &str, settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    match name {
        #[cfg(feature = "provider-google")]
        "gemini" | "google" => Ok(Arc::new(google::Google::from_settings(settings))),
        #[cfg(feature = "provider-openai")]
        "openai" => Ok(Arc::new(openai::OpenAi::from_settings(settings))),
        other => Err(LinguaError::Config(format!(
            "unknown or disabled provider {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_from_bytes_encodes_base64() {
        let payload = Payload::inline_from_bytes("image/png", b"hello", "describe this");
        match payload {
            Payload::Inline {
                mime_type, data, ..
            } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(data, "aGVsbG8=");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_provider_name_is_rejected() {
        let settings = ProviderSettings::default();
        assert!(from_config("carrier-pigeon", &settings).is_err());
    }
}
