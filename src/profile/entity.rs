//! Per-entity attribute store

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::validator::AttributeValidator;
use crate::core::types::{canonical_key, EntityId};

/// Serializable form of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub uuid: EntityId,
    pub name: String,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

/// Stats and metadata of one entity.
///
/// Stat keys are stored canonicalized. Reads and writes are checked against
/// the injected validator; rejected writes are dropped and rejected reads
/// return `0.0`.
pub struct EntityProfile {
    id: EntityId,
    name: RwLock<String>,
    stats: RwLock<AHashMap<String, f64>>,
    meta: RwLock<AHashMap<String, serde_json::Value>>,
    validator: Arc<dyn AttributeValidator>,
}

impl EntityProfile {
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        validator: Arc<dyn AttributeValidator>,
    ) -> Self {
        Self {
            id,
            name: RwLock::new(name.into()),
            stats: RwLock::new(AHashMap::new()),
            meta: RwLock::new(AHashMap::new()),
            validator,
        }
    }

    /// Restore a profile from storage. Stored stats are kept as-is even if
    /// the registry no longer knows them; reads stay validated.
    pub fn from_snapshot(
        snapshot: ProfileSnapshot,
        validator: Arc<dyn AttributeValidator>,
    ) -> Self {
        let stats = snapshot
            .stats
            .into_iter()
            .map(|(k, v)| (canonical_key(&k), v))
            .collect();
        Self {
            id: snapshot.uuid,
            name: RwLock::new(snapshot.name),
            stats: RwLock::new(stats),
            meta: RwLock::new(snapshot.meta.into_iter().collect()),
            validator,
        }
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            uuid: self.id,
            name: self.name.read().clone(),
            stats: self
                .stats
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            meta: self
                .meta
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// Stat value, or `0.0` when absent or not a valid attribute
    pub fn stat(&self, key: &str) -> f64 {
        self.try_stat(key).unwrap_or(0.0)
    }

    pub fn try_stat(&self, key: &str) -> Option<f64> {
        let key = canonical_key(key);
        if !self.validator.permits(&key) {
            return None;
        }
        self.stats.read().get(&key).copied()
    }

    /// Store a stat. Returns false when the key was rejected.
    pub fn set_stat(&self, key: &str, value: f64) -> bool {
        let key = canonical_key(key);
        if !self.validator.permits(&key) {
            tracing::debug!("Dropping write to unknown attribute '{}' on {}", key, self.id);
            return false;
        }
        self.stats.write().insert(key, value);
        true
    }

    /// Copy of all stats
    pub fn stats(&self) -> AHashMap<String, f64> {
        self.stats.read().clone()
    }

    /// Seed missing stats with registry defaults. Returns how many were added.
    pub fn apply_defaults(&self) -> usize {
        let keys = self.validator.known_keys();
        let mut stats = self.stats.write();
        let mut added = 0;
        for key in keys {
            if stats.contains_key(&key) {
                continue;
            }
            if let Some(default) = self.validator.default_value(&key) {
                stats.insert(key, default);
                added += 1;
            }
        }
        added
    }

    pub fn meta(&self, key: &str) -> Option<serde_json::Value> {
        self.meta.read().get(key).cloned()
    }

    /// Typed metadata read; `None` if absent or of another shape
    pub fn meta_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.meta(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn set_meta(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.meta.write().insert(key.into(), value.into());
    }
}

impl std::fmt::Debug for EntityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityProfile")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeRegistry, SchemaNode};
    use crate::profile::PermissiveValidator;

    fn registry() -> Arc<AttributeRegistry> {
        let schema = SchemaNode::from_toml_str(
            r#"
[Basic.STR]
default = 5
[Basic.Max-Health]
display-name = "Max Health"
default = 100
"#,
        )
        .unwrap();
        Arc::new(AttributeRegistry::from_schema(&schema))
    }

    #[test]
    fn test_valid_write_round_trips() {
        let profile = EntityProfile::new(EntityId::new(), "Alice", registry());
        assert!(profile.set_stat("STR", 12.0));
        assert_eq!(profile.stat("STR"), 12.0);
        assert_eq!(profile.stat("str"), 12.0);

        assert!(profile.set_stat("Max-Health", 250.0));
        assert_eq!(profile.stat("max_health"), 250.0);
    }

    #[test]
    fn test_invalid_write_is_dropped() {
        let profile = EntityProfile::new(EntityId::new(), "Alice", registry());
        profile.set_stat("STR", 3.0);

        assert!(!profile.set_stat("LUK", 9.0));
        assert_eq!(profile.try_stat("LUK"), None);
        assert_eq!(profile.stat("LUK"), 0.0);
        assert_eq!(profile.stat("STR"), 3.0);
        assert_eq!(profile.stats().len(), 1);
    }

    #[test]
    fn test_unloaded_registry_permits_everything() {
        let unloaded = Arc::new(AttributeRegistry::new());
        let profile = EntityProfile::new(EntityId::new(), "Bootstrap", unloaded);
        assert!(profile.set_stat("Anything", 1.5));
        assert_eq!(profile.stat("anything"), 1.5);
    }

    #[test]
    fn test_apply_defaults() {
        let profile = EntityProfile::new(EntityId::new(), "Alice", registry());
        profile.set_stat("STR", 20.0);

        assert_eq!(profile.apply_defaults(), 1);
        assert_eq!(profile.stat("STR"), 20.0);
        assert_eq!(profile.stat("Max-Health"), 100.0);
    }

    #[test]
    fn test_snapshot_round_trip_through_json() {
        let profile = EntityProfile::new(EntityId::new(), "Alice", Arc::new(PermissiveValidator));
        profile.set_stat("Level", 7.0);
        profile.set_meta("class", "Warrior");

        let json = serde_json::to_string(&profile.snapshot()).unwrap();
        let restored = EntityProfile::from_snapshot(
            serde_json::from_str(&json).unwrap(),
            Arc::new(PermissiveValidator),
        );

        assert_eq!(restored.id(), profile.id());
        assert_eq!(restored.name(), "Alice");
        assert_eq!(restored.stat("level"), 7.0);
        assert_eq!(restored.meta_as::<String>("class").as_deref(), Some("Warrior"));
    }

    #[test]
    fn test_concurrent_reads_and_writes() {
        let profile = Arc::new(EntityProfile::new(
            EntityId::new(),
            "Shared",
            Arc::new(PermissiveValidator),
        ));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let profile = Arc::clone(&profile);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        profile.set_stat(&format!("stat{}", t), i as f64);
                        let _ = profile.stat("stat0");
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(profile.stat("stat3"), 499.0);
    }
}
