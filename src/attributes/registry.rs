//! Attribute registry built from the configured schema.
//!
//! Readers load an immutable snapshot; a rebuild assembles a complete
//! replacement off to the side and publishes it with a single swap, so a
//! reader never observes a half-built registry.

use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use serde::Serialize;

use super::schema::SchemaNode;
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::types::canonical_key;
use crate::lifecycle::Lifecycle;
use crate::profile::AttributeValidator;

/// Canonical definition of one attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDefinition {
    /// Lookup key, e.g. `combat_ability`
    pub key: String,
    /// Dotted schema path, e.g. `Battle-Status.Combat-Ability`
    pub path: String,
    pub display_name: String,
    pub default_value: f64,
    pub status_value: Option<i64>,
}

/// Two schema paths that produced the same canonical key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCollision {
    pub key: String,
    pub replaced_path: String,
    pub winning_path: String,
}

#[derive(Debug, Default)]
struct RegistrySnapshot {
    loaded: bool,
    by_key: AHashMap<String, Arc<AttributeDefinition>>,
    collisions: Vec<KeyCollision>,
}

impl RegistrySnapshot {
    fn build(schema: &SchemaNode) -> Self {
        let mut snap = Self {
            loaded: true,
            ..Default::default()
        };
        if let SchemaNode::Category(children) = schema {
            for (key, child) in children {
                snap.walk(key, key, child);
            }
        }
        snap
    }

    fn walk(&mut self, key: &str, path: &str, node: &SchemaNode) {
        match node {
            SchemaNode::Attribute(spec) => {
                let definition = AttributeDefinition {
                    key: canonical_key(key),
                    path: path.to_string(),
                    display_name: spec
                        .display_name
                        .clone()
                        .unwrap_or_else(|| key.to_string()),
                    default_value: spec.default,
                    status_value: spec.status_value,
                };
                self.insert(definition);
            }
            SchemaNode::Category(children) => {
                for (child_key, child) in children {
                    let child_path = format!("{}.{}", path, child_key);
                    self.walk(child_key, &child_path, child);
                }
            }
        }
    }

    /// Later registrations win; the collision is recorded and logged
    fn insert(&mut self, definition: AttributeDefinition) {
        if let Some(previous) = self.by_key.get(&definition.key) {
            tracing::warn!(
                "Duplicate attribute key '{}' at {} replaces {}",
                definition.key,
                definition.path,
                previous.path
            );
            self.collisions.push(KeyCollision {
                key: definition.key.clone(),
                replaced_path: previous.path.clone(),
                winning_path: definition.path.clone(),
            });
        }
        self.by_key
            .insert(definition.key.clone(), Arc::new(definition));
    }
}

/// Process-wide store of valid attribute definitions
pub struct AttributeRegistry {
    snap: ArcSwap<RegistrySnapshot>,
}

impl AttributeRegistry {
    /// Create an empty, not-yet-loaded registry
    pub fn new() -> Self {
        Self {
            snap: ArcSwap::from_pointee(RegistrySnapshot::default()),
        }
    }

    /// Create a registry and load it from a schema
    pub fn from_schema(schema: &SchemaNode) -> Self {
        let registry = Self::new();
        registry.rebuild(schema);
        registry
    }

    /// Replace every definition with those found in `schema`.
    ///
    /// Returns the number of registered attributes.
    pub fn rebuild(&self, schema: &SchemaNode) -> usize {
        if schema.is_empty() {
            tracing::warn!("Attribute schema is empty; no attributes registered");
        }
        let snap = RegistrySnapshot::build(schema);
        let count = snap.by_key.len();
        self.snap.store(Arc::new(snap));
        tracing::info!("Registered {} attributes", count);
        count
    }

    /// Drop all definitions and return to the unloaded state
    pub fn clear(&self) {
        self.snap.store(Arc::new(RegistrySnapshot::default()));
    }

    /// Whether a schema has been loaded since creation or the last clear
    pub fn is_loaded(&self) -> bool {
        self.snap.load().loaded
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.snap.load().by_key.contains_key(&canonical_key(key))
    }

    pub fn get(&self, key: &str) -> Option<Arc<AttributeDefinition>> {
        self.snap.load().by_key.get(&canonical_key(key)).cloned()
    }

    /// Owned copy of every definition, ordered by schema path
    pub fn all(&self) -> Vec<Arc<AttributeDefinition>> {
        let snap = self.snap.load();
        let mut defs: Vec<_> = snap.by_key.values().cloned().collect();
        defs.sort_by(|a, b| a.path.cmp(&b.path));
        defs
    }

    pub fn len(&self) -> usize {
        self.snap.load().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duplicate keys seen during the last rebuild
    pub fn collisions(&self) -> Vec<KeyCollision> {
        self.snap.load().collisions.clone()
    }
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeValidator for AttributeRegistry {
    fn is_loaded(&self) -> bool {
        AttributeRegistry::is_loaded(self)
    }

    fn is_valid(&self, key: &str) -> bool {
        AttributeRegistry::is_valid(self, key)
    }

    fn default_value(&self, key: &str) -> Option<f64> {
        self.get(key).map(|def| def.default_value)
    }

    fn known_keys(&self) -> Vec<String> {
        self.snap.load().by_key.keys().cloned().collect()
    }
}

impl Lifecycle for AttributeRegistry {
    fn name(&self) -> &'static str {
        "attribute-registry"
    }

    fn init(&self, config: &EngineConfig) -> Result<()> {
        self.rebuild(&config.attributes);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.clear();
        Ok(())
    }
}
