use crate::model::{FormattedMessage, PokeNotice};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One downstream WebSocket frame, server → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
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
        request_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Generic pass-through payload for upstream-proxied data that doesn't
    /// fit the `message`/`result` shapes (wire detail left open by the spec).
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

impl Envelope {
    pub fn result_ok(request_id: impl Into<String>, data: Value) -> Self {
        Envelope::Result {
            request_id: request_id.into(),
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn result_err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Envelope::Result {
            request_id: request_id.into(),
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    Formatted(FormattedMessage),
    Poke(PokeNotice),
}

/// The `call` facade named by an `invoke` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Call,
    Data,
    Ok,
    Retry,
}

/// One downstream WebSocket frame, client → server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Ping,
    Invoke {
        request_id: String,
        call: CallKind,
        action: String,
        #[serde(default)]
        params: Value,
    },
    Sdk {
        request_id: String,
        path: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}
