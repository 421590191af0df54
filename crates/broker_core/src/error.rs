use thiserror::Error;

/// Failure modes of an upstream RPC call (`UpstreamClient::call`).
#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    #[error("OneBot socket is not open")]
    NotOpen,

    #[error("Timeout waiting response for action \"{action}\"")]
    Timeout { action: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed (code={code:?}, reason={reason})")]
    Closed { code: Option<u16>, reason: String },

    #[error("upstream action failed (retcode={retcode}): {message}")]
    Application { retcode: i32, message: String },
}

impl UpstreamError {
    /// The raw message RetryClassifier should match against.
    pub fn classify_text(&self) -> String {
        match self {
            UpstreamError::NotOpen => "websocket not open".to_string(),
            UpstreamError::Timeout { .. } => "timeout".to_string(),
            UpstreamError::Transport(msg) => msg.to_lowercase(),
            UpstreamError::Closed { reason, .. } => format!("closed: {reason}").to_lowercase(),
            UpstreamError::Application { message, .. } => message.to_lowercase(),
        }
    }
}

/// Whitelist denial, returned verbatim to the downstream RPC caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistError {
    GroupNotAllowed(i64),
    UserNotAllowed(i64),
}

impl std::fmt::Display for WhitelistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhitelistError::GroupNotAllowed(_) => write!(f, "group_not_in_whitelist"),
            WhitelistError::UserNotAllowed(_) => write!(f, "user_not_in_whitelist"),
        }
    }
}

impl std::error::Error for WhitelistError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_format() {
        let err = UpstreamError::Timeout {
            action: "get_stranger_info".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Timeout waiting response for action \"get_stranger_info\""
        );
    }

    #[test]
    fn test_whitelist_error_wire_format() {
        assert_eq!(
            WhitelistError::GroupNotAllowed(100).to_string(),
            "group_not_in_whitelist"
        );
        assert_eq!(
            WhitelistError::UserNotAllowed(7).to_string(),
            "user_not_in_whitelist"
        );
    }
}
