pub mod config;
pub mod envelope;
pub mod error;
pub mod model;
pub mod segment;
pub mod whitelist;

pub use config::{
    BrokerConfig, LogConfig, PolicyConfig, RateLimitConfig, RpcRetryConfig, StreamServerConfig,
    UpstreamConfig,
};
pub use envelope::{CallKind, ClientEnvelope, Envelope, MessagePayload};
pub use error::{UpstreamError, WhitelistError};
pub use model::{ConversationKind, FormattedMessage, MediaRefs, PokeNotice, ReplyMedia, ReplyRef, SenderRole};
pub use segment::Segment;
pub use whitelist::Whitelist;
