pub mod config;
pub mod error;
pub mod types;

pub use config::{ClassConfig, EngineConfig, GeneralConfig};
pub use error::{NexusError, Result};
pub use types::{canonical_key, EntityId, Role};
