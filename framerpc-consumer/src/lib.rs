pub mod consumer;
mod handles;
pub mod materialize;
pub mod proxy;

pub use consumer::{create_consumer, Consumer, ConsumerConfig, ReleaseOnPageHide};
pub use framerpc_core::OriginPolicy;
pub use materialize::{MatList, MatObject, MatValue};
pub use proxy::{RemoteFunction, RemoteObject, RemoteRef};
