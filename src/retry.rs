//! Retry with exponential backoff for provider calls.
//!
//! Failures are classified as [`ProviderError::Transient`] (HTTP 429, 5xx,
//! timeouts, connection errors) or [`ProviderError::Fatal`] (other 4xx,
//! malformed responses). Only transient failures are retried.
//!
//! Backoff: 500ms, 1s, 2s, 4s, 8s, 8s, ...

use std::future::Future;
use std::time::Duration;

use ragchat_core::ProviderError;
use reqwest::StatusCode;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY: Duration = Duration::from_secs(8);

/// Delay before retry number `attempt` (0-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let ms = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(ms).min(MAX_DELAY)
}

/// Run `op` up to `max_attempts` times, sleeping between transient failures.
pub async fn with_backoff<T, F, Fut>(what: &str, max_attempts: u32, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    provider = what,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Classify a non-success HTTP status.
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{} API error {}: {}", provider, status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(message)
    } else {
        ProviderError::Fatal(message)
    }
}

/// Classify a transport-level error.
pub fn classify_transport(provider: &str, err: &reqwest::Error) -> ProviderError {
    let message = format!("{} request failed: {}", provider, err);
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(message)
    } else {
        ProviderError::Fatal(message)
    }
}

/// POST a JSON body and return the decoded JSON response, with retries.
pub async fn post_json(
    provider: &str,
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
    max_attempts: u32,
) -> Result<serde_json::Value, ProviderError> {
    with_backoff(provider, max_attempts, move || async move {
        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(provider, &e))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(provider, status, &body_text));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::Fatal(format!("{} returned invalid JSON: {}", provider, e)))
    })
    .await
}

/// Read an API key from the environment.
pub fn api_key(var: &str) -> anyhow::Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(8));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status("x", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("x", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status("x", StatusCode::UNAUTHORIZED, "bad key").is_transient());
        assert!(!classify_status("x", StatusCode::BAD_REQUEST, "").is_transient());
        let msg = classify_status("OpenAI", StatusCode::UNAUTHORIZED, " bad key\n").to_string();
        assert!(msg.contains("OpenAI API error 401"));
        assert!(msg.contains("bad key"));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_backoff("test", 5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Fatal("401".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_backoff("test", 3, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(ProviderError::Transient("503".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_gives_up_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_backoff("test", 1, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("timeout".into()))
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Transient(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
