//! Profile persistence backends

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use super::entity::ProfileSnapshot;
use crate::core::error::Result;
use crate::core::types::EntityId;

/// Where profiles are loaded from and saved to
pub trait ProfileStorage: Send + Sync {
    /// Prepare the backend (create directories, tables, ...)
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// `Ok(None)` when no profile has been stored for `id`
    fn load(&self, id: EntityId) -> Result<Option<ProfileSnapshot>>;

    fn save(&self, snapshot: &ProfileSnapshot) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One pretty-printed JSON file per profile
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: EntityId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl ProfileStorage for JsonFileStorage {
    fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn load(&self, id: EntityId) -> Result<Option<ProfileSnapshot>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, snapshot: &ProfileSnapshot) -> Result<()> {
        let path = self.path_for(snapshot.uuid);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Map-backed storage for tests and embedding
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<AHashMap<EntityId, ProfileSnapshot>>,
    saves: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<ProfileSnapshot> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn insert(&self, snapshot: ProfileSnapshot) {
        self.entries.lock().insert(snapshot.uuid, snapshot);
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ProfileStorage for InMemoryStorage {
    fn load(&self, id: EntityId) -> Result<Option<ProfileSnapshot>> {
        Ok(self.get(id))
    }

    fn save(&self, snapshot: &ProfileSnapshot) -> Result<()> {
        self.insert(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
