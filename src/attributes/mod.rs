//! Attribute registry
//!
//! Builds canonical attribute definitions from the nested category schema in
//! configuration and answers key validation for profile writes.

pub mod registry;
pub mod schema;

pub use registry::{AttributeDefinition, AttributeRegistry, KeyCollision};
pub use schema::{AttributeSpec, SchemaNode};
