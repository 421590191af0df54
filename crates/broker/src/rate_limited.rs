//! Wraps an `UpstreamCaller` so every call acquires a rate-limit permit
//! first. The permit is held for the duration of the call and released on
//! drop, giving every collaborator (Enricher, Renderer, StreamServer RPC
//! dispatch) a single shared concurrency/interval gate over the same
//! `UpstreamClient`, per the rate limiter's RAII contract.

use async_trait::async_trait;
use broker_core::UpstreamError;
use enrich::UpstreamCaller;
use onebot::{RateLimiter, UpstreamResponse};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct RateLimitedUpstream<C: UpstreamCaller> {
    inner: C,
    limiter: Arc<RateLimiter>,
}

impl<C: UpstreamCaller> RateLimitedUpstream<C> {
    pub fn new(inner: C, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<C: UpstreamCaller> UpstreamCaller for RateLimitedUpstream<C> {
    async fn call(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let _permit = self.limiter.acquire().await;
        self.inner.call(action, params, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUpstream {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamCaller for CountingUpstream {
        async fn call(
            &self,
            _action: &str,
            _params: Value,
            _timeout: Option<Duration>,
        ) -> Result<UpstreamResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UpstreamResponse {
                status: "ok".to_string(),
                retcode: 0,
                data: None,
                message: None,
                wording: None,
                echo: None,
            })
        }
    }

    #[tokio::test]
    async fn test_call_passes_through_and_releases_permit() {
        let limiter = Arc::new(RateLimiter::new(1, 0));
        let wrapped = RateLimitedUpstream::new(
            CountingUpstream {
                calls: AtomicUsize::new(0),
            },
            limiter.clone(),
        );
        wrapped.call("get_stranger_info", serde_json::json!({}), None).await.unwrap();
        assert_eq!(limiter.available_permits(), 1);
        assert_eq!(wrapped.inner.calls.load(Ordering::SeqCst), 1);
    }
}
