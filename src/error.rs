use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinguaError {
    #[error("no api keys configured for provider {provider}")]
    NoKeysConfigured { provider: String },
    #[error("no usable api keys for provider {provider} (blacklisted or saturated)")]
    NoKeysAvailable { provider: String },
    #[error("invalid api key ({status}): {body}")]
    InvalidKey {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("rate limited ({status}): {body}")]
    RateLimited {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("all keys exhausted after {} attempts: {}", .failures.len(), format_key_failures(.failures))]
    AllKeysExhausted { failures: Vec<(String, String)> },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinguaError>;

impl LinguaError {
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether another attempt (possibly on a different key) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. }
                | Self::RateLimited { .. }
                | Self::Api { .. }
                | Self::Http(_)
                | Self::InvalidResponse(_)
        )
    }
}

/// Classify a non-success HTTP response. Status takes precedence; the body is
/// only consulted when the status alone is ambiguous, since Gemini reports
/// both bad keys and exhausted quotas as 400/403 in some deployments.
pub(crate) fn classify_api_error(status: reqwest::StatusCode, body: String) -> LinguaError {
    if status == reqwest::StatusCode::BAD_REQUEST {
        return LinguaError::InvalidKey { status, body };
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status == reqwest::StatusCode::FORBIDDEN
    {
        return LinguaError::RateLimited { status, body };
    }
    let lower = body.to_ascii_lowercase();
    if lower.contains("api key not valid")
        || lower.contains("api_key_invalid")
        || lower.contains("invalid key")
    {
        return LinguaError::InvalidKey { status, body };
    }
    if lower.contains("rate limit")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
    {
        return LinguaError::RateLimited { status, body };
    }
    LinguaError::Api { status, body }
}

fn format_key_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(key, reason)| format!("{key}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}
