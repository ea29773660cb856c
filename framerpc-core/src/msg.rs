//! Wire protocol. Every message travels inside an envelope carrying the
//! protocol discriminator and the channel name; anything that fails either
//! check, or that does not parse as a known message, is ignored by the
//! receiving peer.

use crate::ids::{CallId, HandleId};
use crate::snapshot::SnapshotGraph;
use crate::value::WireValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL: &str = "iframe-rpc";

/// Handshake payload: the provider's value snapshot and function path set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub values: SnapshotGraph,
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleKind {
    Function,
    Object,
}

/// Call result payload: either a plain value graph or a handle reference.
/// Object-kind handles carry a scoped snapshot of the result; only the
/// outermost composite of a result is ever wrapped, so payloads never nest
/// handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__rpc__", rename_all = "camelCase")]
pub enum Payload {
    Value {
        values: SnapshotGraph,
    },
    Handle {
        id: HandleId,
        kind: HandleKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        values: Option<SnapshotGraph>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        functions: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    Ready {
        payload: ReadyPayload,
    },
    Get,
    Call {
        id: CallId,
        method: String,
        #[serde(default)]
        args: Vec<WireValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<HandleId>,
    },
    Result {
        id: CallId,
        result: Payload,
    },
    Error {
        id: CallId,
        error: String,
    },
    InitError {
        error: String,
    },
    ReleaseHandle {
        handle: HandleId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub proto: String,
    pub name: String,
    #[serde(flatten)]
    pub msg: Message,
}

impl Envelope {
    pub fn new(name: impl Into<String>, msg: Message) -> Self {
        Envelope {
            proto: PROTOCOL.to_string(),
            name: name.into(),
            msg,
        }
    }

    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Lenient decode: `None` for messages addressed to another protocol
    /// or channel and for unknown message shapes.
    pub fn decode(data: &Value, expected_name: &str) -> Option<Envelope> {
        let proto = data.get("proto").and_then(|p| p.as_str())?;
        let name = data.get("name").and_then(|n| n.as_str())?;
        if proto != PROTOCOL || name != expected_name {
            return None;
        }
        match serde_json::from_value::<Envelope>(data.clone()) {
            Ok(env) => Some(env),
            Err(err) => {
                tracing::trace!("ignoring unparseable message on {}: {}", expected_name, err);
                None
            }
        }
    }
}
