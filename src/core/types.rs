//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for profiled entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which bound entity a dynamic reference reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// The acting entity (attacker, or the profile being updated)
    #[default]
    Primary,
    /// The entity acted upon (defender)
    Secondary,
}

impl Role {
    /// Parse a role suffix. Unrecognized suffixes fall back to primary.
    pub fn from_suffix(suffix: &str) -> Self {
        match suffix.trim().to_ascii_lowercase().as_str() {
            "$defender$" | "defender" | "secondary" | "target" => Role::Secondary,
            _ => Role::Primary,
        }
    }
}

/// Pipeline mode, selected from the presence of a secondary entity unless
/// the caller names one explicitly.
pub const MODE_ADVERSARIAL: &str = "adversarial";
pub const MODE_SOLO: &str = "solo";
pub const MODE_DEFAULT: &str = "default";

/// Canonical attribute key: lowercase, with `-` and whitespace mapped to `_`.
pub fn canonical_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c == '-' || c.is_whitespace() {
                '_'
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}
