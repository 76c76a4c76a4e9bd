use futures_util::StreamExt;

use crate::error::classify_api_error;
use crate::Result;

const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Sends the request and maps non-success statuses through the key and
/// rate-limit aware classifier. Error bodies are read with a hard cap so a
/// misbehaving endpoint cannot balloon memory.
pub(crate) async fn send_classified(req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = req.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
        return Err(classify_api_error(status, body));
    }
    Ok(response)
}

pub(crate) async fn send_classified_json(
    req: reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let response = send_classified(req).await?;
    Ok(response.json::<serde_json::Value>().await?)
}

pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> String {
    let (bytes, truncated) = response_bytes_truncated(response, max_bytes).await;
    let mut body = String::from_utf8_lossy(&bytes).to_string();
    if truncated {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("...(truncated)");
    }
    body
}

async fn response_bytes_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let max_bytes = max_bytes.max(1);
    let mut out = Vec::<u8>::new();
    let mut truncated = false;

    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let Ok(chunk) = next else {
            break;
        };
        let remaining = max_bytes.saturating_sub(out.len());
        if remaining == 0 {
            truncated = true;
            break;
        }
        if chunk.len() <= remaining {
            out.extend_from_slice(chunk.as_ref());
        } else {
            out.extend_from_slice(&chunk.as_ref()[..remaining]);
            truncated = true;
            break;
        }
    }
    (out, truncated)
}
