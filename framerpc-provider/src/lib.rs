pub mod handles;
pub mod provider;

pub use framerpc_core::OriginPolicy;
pub use handles::{HandleEntry, HandleTable};
pub use provider::{create_provider, Provider, ProviderConfig};
