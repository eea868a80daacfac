//! HTTP plumbing shared by the collector variants: client construction,
//! deadline-bounded requests, and status → [`CollectorError`] mapping.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use threatintel_shared::{CollectorError, Result, ThreatIntelError};

use crate::Deadline;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we consider valid (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for collector requests.
const USER_AGENT: &str = concat!("threatintel/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client. Per-request timeouts come from the deadline.
pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| ThreatIntelError::Network(format!("failed to build HTTP client: {e}")))
}

/// Read an API key from the env var named in config, if any.
pub(crate) fn api_key(env_name: Option<&str>) -> Option<String> {
    let name = env_name?;
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => Some(val),
        _ => {
            debug!(env = name, "API key env var not set, sending unauthenticated request");
            None
        }
    }
}

/// Send `request` and read its body, both bounded by `deadline`.
pub(crate) async fn fetch_text(
    request: RequestBuilder,
    deadline: Deadline,
) -> std::result::Result<String, CollectorError> {
    if deadline.is_expired() {
        return Err(CollectorError::Timeout);
    }

    let exchange = async {
        let response = request
            .timeout(deadline.remaining())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response)?;
        read_capped(response, MAX_RESPONSE_SIZE).await
    };

    tokio::time::timeout_at(deadline.instant(), exchange)
        .await
        .map_err(|_| CollectorError::Timeout)?
}

/// Read the body chunk by chunk, failing once it grows past `max` bytes.
/// Content-Length is only a hint; chunked bodies are counted as they arrive.
async fn read_capped(
    mut response: Response,
    max: u64,
) -> std::result::Result<String, CollectorError> {
    let too_large = |len: u64| {
        CollectorError::malformed(format!("response too large ({len} bytes, max {max})"))
    };

    if let Some(len) = response.content_length() {
        if len > max {
            return Err(too_large(len));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
        let len = (body.len() + chunk.len()) as u64;
        if len > max {
            return Err(too_large(len));
        }
        body.extend_from_slice(&chunk);
    }

    String::from_utf8(body).map_err(|e| CollectorError::malformed(format!("body is not UTF-8: {e}")))
}

/// Send `request` and decode a JSON body, bounded by `deadline`.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
    deadline: Deadline,
) -> std::result::Result<T, CollectorError> {
    let body = fetch_text(request, deadline).await?;
    serde_json::from_str(&body).map_err(|e| CollectorError::malformed(format!("invalid JSON: {e}")))
}

/// Map transport-level reqwest errors.
fn map_reqwest_error(e: reqwest::Error) -> CollectorError {
    if e.is_timeout() {
        CollectorError::Timeout
    } else if e.is_decode() {
        CollectorError::malformed(e.to_string())
    } else if e.is_builder() {
        CollectorError::Network {
            message: e.to_string(),
            transient: false,
        }
    } else {
        CollectorError::network(e.to_string())
    }
}

/// Map non-success HTTP statuses.
fn check_status(response: Response) -> std::result::Result<Response, CollectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(CollectorError::RateLimited { retry_after_secs });
    }

    let message = status.canonical_reason().unwrap_or("unknown status").to_string();
    if status.is_server_error() {
        Err(CollectorError::Network {
            message: format!("HTTP {status}"),
            transient: true,
        })
    } else {
        Err(CollectorError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

/// Collapse whitespace and cut `text` to at most `max` characters.
pub(crate) fn clip(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut clipped: String = collapsed.chars().take(max).collect();
    if let Some(idx) = clipped.rfind(' ') {
        clipped.truncate(idx);
    }
    clipped.push('…');
    clipped
}
