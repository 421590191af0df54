//! Downstream wire shapes.
//!
//! The consumer-facing JSON uses camelCase field names (`requestId`); the
//! internal `broker_core::envelope` types are snake_case like the rest of
//! the crate. These wrappers translate between the two at the boundary.

use broker_core::{CallKind, ClientEnvelope, Envelope, MessagePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One downstream frame, client → server, camelCase on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireClientEnvelope {
    Ping,
    Invoke {
        #[serde(rename = "requestId")]
        request_id: String,
        call: CallKind,
        action: String,
        #[serde(default)]
        params: Value,
    },
    Sdk {
        #[serde(rename = "requestId")]
        request_id: String,
        path: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl From<WireClientEnvelope> for ClientEnvelope {
    fn from(wire: WireClientEnvelope) -> Self {
        match wire {
            WireClientEnvelope::Ping => ClientEnvelope::Ping,
            WireClientEnvelope::Invoke {
                request_id,
                call,
                action,
                params,
            } => ClientEnvelope::Invoke {
                request_id,
                call,
                action,
                params,
            },
            WireClientEnvelope::Sdk {
                request_id,
                path,
                args,
            } => ClientEnvelope::Sdk {
                request_id,
                path,
                args,
            },
        }
    }
}

/// One downstream frame, server → client, camelCase on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEnvelope {
    Welcome {
        message: String,
        time: i64,
    },
    Pong {
        time: i64,
    },
    Message {
        data: MessagePayload,
    },
    Result {
        #[serde(rename = "requestId")]
        request_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Proxy {
        data: Value,
    },
    Disconnect {
        reason: String,
    },
    Error {
        message: String,
    },
    Shutdown {
        message: String,
    },
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Welcome { message, time } => WireEnvelope::Welcome { message, time },
            Envelope::Pong { time } => WireEnvelope::Pong { time },
            Envelope::Message { data } => WireEnvelope::Message { data },
            Envelope::Result {
                request_id,
                ok,
                data,
                error,
            } => WireEnvelope::Result {
                request_id,
                ok,
                data,
                error,
            },
            Envelope::Proxy { data } => WireEnvelope::Proxy { data },
            Envelope::Disconnect { reason } => WireEnvelope::Disconnect { reason },
            Envelope::Error { message } => WireEnvelope::Error { message },
            Envelope::Shutdown { message } => WireEnvelope::Shutdown { message },
        }
    }
}

/// Render an `Envelope` as the downstream JSON frame (camelCase fields).
pub fn encode_envelope(envelope: Envelope) -> String {
    serde_json::to_string(&WireEnvelope::from(envelope)).unwrap_or_else(|e| {
        tracing::error!("failed to encode envelope: {e}");
        r#"{"type":"error","message":"internal encode failure"}"#.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invoke_uses_camelcase_request_id() {
        let json = r#"{"type":"invoke","requestId":"r1","call":"data","action":"get_stranger_info","params":{"user_id":7}}"#;
        let wire: WireClientEnvelope = serde_json::from_str(json).unwrap();
        let internal: ClientEnvelope = wire.into();
        match internal {
            ClientEnvelope::Invoke {
                request_id, call, action, ..
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(call, CallKind::Data);
                assert_eq!(action, "get_stranger_info");
            }
            _ => panic!("expected invoke"),
        }
    }

    #[test]
    fn test_parse_sdk_request() {
        let json = r#"{"type":"sdk","requestId":"r2","path":"send.group","args":[100,"hi"]}"#;
        let wire: WireClientEnvelope = serde_json::from_str(json).unwrap();
        let internal: ClientEnvelope = wire.into();
        match internal {
            ClientEnvelope::Sdk {
                request_id, path, args,
            } => {
                assert_eq!(request_id, "r2");
                assert_eq!(path, "send.group");
                assert_eq!(args, vec![serde_json::json!(100), serde_json::json!("hi")]);
            }
            _ => panic!("expected sdk"),
        }
    }

    #[test]
    fn test_encode_result_uses_camelcase_request_id() {
        let json = encode_envelope(Envelope::result_err("r3", "group_not_in_whitelist"));
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["requestId"], "r3");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "group_not_in_whitelist");
    }

    #[test]
    fn test_encode_welcome() {
        let json = encode_envelope(Envelope::Welcome {
            message: "hi".into(),
            time: 123,
        });
        assert!(json.contains("\"type\":\"welcome\""));
        assert!(json.contains("\"time\":123"));
    }
}
