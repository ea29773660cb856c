use crate::ids::HandleId;
use serde_json::Value;

/// Error type shared by both peers.
///
/// Only the display string crosses the wire; the consumer re-raises remote
/// failures as [`RpcError::Remote`] carrying that string verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// Failure raised by a user-supplied API function. Displays as the raw
    /// message so callers see exactly what the function reported.
    #[error("{0}")]
    App(String),

    #[error("Method {0} not found")]
    MethodNotFound(String),

    #[error("Handle {0} not found")]
    HandleNotFound(HandleId),

    #[error("Handle {0} released")]
    HandleReleased(HandleId),

    #[error("iframe-rpc initialization timeout for name: {0}")]
    InitTimeout(String),

    #[error("{0}")]
    InitFailed(String),

    /// Error string received from the remote peer, re-raised locally.
    #[error("{0}")]
    Remote(String),

    #[error("peer unavailable")]
    PeerUnavailable,
}

impl RpcError {
    pub fn app(message: impl Into<String>) -> Self {
        RpcError::App(message.into())
    }

    /// Render a dotted method path for a not-found error. An empty path
    /// means the call targeted the handle value itself.
    pub fn method_not_found(method: &str) -> Self {
        if method.is_empty() {
            RpcError::MethodNotFound("\"<root>\"".to_string())
        } else {
            RpcError::MethodNotFound(method.to_string())
        }
    }

    /// True for errors meaning the handle backing a call is gone, whether
    /// the rejection was produced locally or by the remote peer.
    pub fn is_handle_gone(&self) -> bool {
        match self {
            RpcError::HandleNotFound(_) | RpcError::HandleReleased(_) => true,
            RpcError::Remote(msg) => {
                msg.starts_with("Handle ")
                    && (msg.ends_with("not found") || msg.ends_with("released"))
            }
            _ => false,
        }
    }
}

/// Collapse an arbitrary error-ish value to the message string carried on
/// the wire: a `message` field when one exists, else the JSON rendering,
/// else the plain string form.
pub fn serialize_error_value(value: &Value) -> String {
    if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
        return message.to_string();
    }
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Wire form of an [`RpcError`]: its display string.
pub fn serialize_error(error: &RpcError) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_app_error_displays_raw_message() {
        let err = RpcError::app("boom");
        assert_eq!(format!("{}", err), "boom");
    }

    #[test]
    fn test_method_not_found_rendering() {
        let err = RpcError::method_not_found("nested.fn");
        assert_eq!(format!("{}", err), "Method nested.fn not found");

        let root = RpcError::method_not_found("");
        assert_eq!(format!("{}", root), "Method \"<root>\" not found");
    }

    #[test]
    fn test_handle_errors_name_the_id() {
        let id = HandleId::from("h-1");
        assert_eq!(
            format!("{}", RpcError::HandleNotFound(id.clone())),
            "Handle h-1 not found"
        );
        assert_eq!(
            format!("{}", RpcError::HandleReleased(id)),
            "Handle h-1 released"
        );
    }

    #[test]
    fn test_is_handle_gone_covers_remote_form() {
        assert!(RpcError::HandleReleased(HandleId::from("x")).is_handle_gone());
        assert!(RpcError::Remote("Handle x not found".to_string()).is_handle_gone());
        assert!(!RpcError::Remote("boom".to_string()).is_handle_gone());
    }

    #[test]
    fn test_serialize_error_value_prefers_message_field() {
        let v = json!({ "message": "boom", "stack": "..." });
        assert_eq!(serialize_error_value(&v), "boom");

        let plain = json!("plain failure");
        assert_eq!(serialize_error_value(&plain), "plain failure");

        let object = json!({ "code": 7 });
        assert_eq!(serialize_error_value(&object), "{\"code\":7}");
    }

    #[test]
    fn test_init_timeout_message_format() {
        let err = RpcError::InitTimeout("my-api".to_string());
        assert_eq!(
            format!("{}", err),
            "iframe-rpc initialization timeout for name: my-api"
        );
    }
}
