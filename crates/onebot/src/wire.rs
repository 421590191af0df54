//! Upstream OneBot wire types: action requests/responses and events.
//!
//! Generalized from the teacher's `OneBotEvent`/`OneBotResponse`
//! (`mneme_onebot::event`): `notice` is promoted from a raw `Value` carrier
//! to a typed `NoticeEvent` (pokes need `notice_type`/`sub_type`/`target_id`),
//! and `message` segments decode through `broker_core::Segment` instead of a
//! single `raw_message` string.

use broker_core::Segment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound action request, `{action, params, echo}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamFrame {
    pub action: String,
    pub params: Value,
    pub echo: String,
}

/// Inbound action response, matched back to a pending call by `echo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub status: String,
    pub retcode: i32,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub wording: Option<String>,
    pub echo: Option<String>,
}

impl UpstreamResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Inbound event, tagged by `post_type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "post_type")]
pub enum UpstreamEvent {
    #[serde(rename = "message")]
    Message(MessageEvent),
    #[serde(rename = "notice")]
    Notice(NoticeEvent),
    #[serde(rename = "meta_event")]
    Meta(MetaEvent),
    #[serde(rename = "request")]
    Request(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub message_id: i64,
    pub self_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub group_name: Option<String>,
    pub time: i64,
    pub message: Vec<Segment>,
    pub sender: EventSender,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSender {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// `notify`/`poke` and other group/friend notices. Fields beyond the
/// well-known ones are preserved in `extra` rather than dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct NoticeEvent {
    pub notice_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub self_id: i64,
    pub time: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "meta_event_type")]
pub enum MetaEvent {
    #[serde(rename = "heartbeat")]
    Heartbeat {
        time: i64,
        status: Value,
        interval: i64,
    },
    #[serde(rename = "lifecycle")]
    Lifecycle { time: i64, sub_type: String },
}
