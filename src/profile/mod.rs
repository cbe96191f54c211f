//! Entity profiles
//!
//! A profile is the per-entity container of attribute values and metadata
//! that formulas read from and the pipeline writes back into.

pub mod entity;
pub mod manager;
pub mod storage;
pub mod validator;

pub use entity::{EntityProfile, ProfileSnapshot};
pub use manager::ProfileManager;
pub use storage::{InMemoryStorage, JsonFileStorage, ProfileStorage};
pub use validator::{AttributeValidator, PermissiveValidator};
