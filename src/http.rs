//! Shared HTTP plumbing for the Cloudflare clients.

use anyhow::Result;
use std::time::Duration;

/// Longest response body excerpt kept in errors and logs.
pub const BODY_EXCERPT_CHARS: usize = 500;

/// Build a client with an explicit request deadline.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Truncate a response body on a char boundary.
pub fn excerpt(body: &str) -> String {
    if body.chars().count() <= BODY_EXCERPT_CHARS {
        return body.to_string();
    }
    let mut out: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
    out.push('…');
    out
}

/// Send `request`, retrying transport failures (connect, timeout) up to
/// `max_retries` times with [`backoff`]. Any HTTP response, success or not,
/// is returned as is and never retried.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: u32,
    endpoint: &str,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut attempt = 0;
    loop {
        // Streaming bodies cannot be cloned; those get a single attempt.
        let Some(this_try) = request.try_clone() else {
            return request.send().await;
        };

        tracing::debug!(endpoint = %endpoint, attempt, "sending request");
        match this_try.send().await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(endpoint = %endpoint, attempt, error = %e, "request failed, retrying");
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential backoff before retry `attempt` (1-based): 1s, 2s, 4s, ... capped at 32s.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}
