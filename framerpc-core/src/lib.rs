pub mod api;
pub mod error;
pub mod ids;
pub mod msg;
pub mod origin;
pub mod path;
pub mod snapshot;
pub mod value;

pub use api::{get_deep, ApiFunction, ApiGetter, ApiNode, ApiObject, FnGetter, NativeFunction};
pub use error::{serialize_error, serialize_error_value, RpcError};
pub use ids::{mint_token, CallId, HandleId, NodeId};
pub use msg::{Envelope, HandleKind, Message, Payload, ReadyPayload, PROTOCOL};
pub use origin::OriginPolicy;
pub use snapshot::{Snapshot, SnapshotGraph, SnapshotNode};
pub use value::{Brand, WireValue};

pub use async_trait::async_trait;
