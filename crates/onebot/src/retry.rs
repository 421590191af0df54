//! Classifies failed upstream calls as worth retrying and drives the retry
//! loop around them.
//!
//! Generalizes the teacher's HTTP-status-based `with_retry` (exponential
//! backoff over `reqwest::StatusCode`) to free-text substring classification
//! over upstream error messages, with fixed interval spacing instead of
//! exponential backoff.

use std::time::Duration;

const NON_RETRIABLE: &[&str] = &[
    "invalid_path",
    "invalid path",
    "unauthorized",
    "forbidden",
    "bad request",
    "not found",
    "参数错误",
    "invalid",
];

const RETRIABLE: &[&str] = &[
    "websocket not open",
    "no reverse ws client connected",
    "closed",
    "timeout",
    "timed out",
    "econnrefused",
    "econnreset",
    "failed to fetch",
    "network",
    "temporarily",
];

/// Lowercased-substring classifier over upstream error text. Defaults to
/// retriable when nothing matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryClassifier;

impl RetryClassifier {
    pub fn is_retriable(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        if NON_RETRIABLE.iter().any(|tok| lower.contains(tok)) {
            return false;
        }
        if RETRIABLE.iter().any(|tok| lower.contains(tok)) {
            return true;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(10),
        }
    }
}

/// Runs `operation` until it succeeds, the classifier says the error is not
/// worth retrying, or `max_attempts` is exhausted. On the last attempt the
/// original error is surfaced regardless of classification.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    classifier: &RetryClassifier,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("upstream call succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(err) => {
                let text = err.to_string();
                if attempt >= config.max_attempts || !classifier.is_retriable(&text) {
                    return Err(err);
                }
                tracing::warn!(
                    "upstream call failed on attempt {}/{}: {}; retrying in {:?}",
                    attempt,
                    config.max_attempts,
                    text,
                    config.interval
                );
                tokio::time::sleep(config.interval).await;
                attempt += 1;
            }
        }
    }
}
