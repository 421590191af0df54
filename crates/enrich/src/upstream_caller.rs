//! Narrow seam over `UpstreamClient::call` so the enricher can be exercised
//! against a canned responder in tests instead of a live socket.

use async_trait::async_trait;
use broker_core::UpstreamError;
use onebot::{UpstreamClient, UpstreamResponse};
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait UpstreamCaller: Send + Sync {
    async fn call(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

#[async_trait]
impl UpstreamCaller for UpstreamClient {
    async fn call(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        UpstreamClient::call(self, action, params, timeout).await
    }
}
