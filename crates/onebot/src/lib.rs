pub mod client;
pub mod rate_limiter;
pub mod retry;
pub mod wire;

pub use client::{UpstreamClient, UpstreamConfig};
pub use rate_limiter::{RateLimitPermit, RateLimiter};
pub use retry::{with_retry, RetryClassifier, RetryConfig};
pub use wire::{EventSender, MessageEvent, MetaEvent, NoticeEvent, UpstreamEvent, UpstreamFrame, UpstreamResponse};
