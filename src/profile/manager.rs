//! Loaded-profile cache with asynchronous persistence.
//!
//! Saves normally run on a small background runtime so callers never wait
//! on storage. [`ProfileManager::shutdown`] is the one blocking path: it
//! drains every pending save and then writes every cached profile
//! synchronously before returning.

use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use super::entity::EntityProfile;
use super::storage::ProfileStorage;
use super::validator::AttributeValidator;
use crate::core::config::EngineConfig;
use crate::core::error::{NexusError, Result};
use crate::core::types::EntityId;
use crate::lifecycle::Lifecycle;

pub struct ProfileManager {
    profiles: DashMap<EntityId, Arc<EntityProfile>>,
    storage: Arc<dyn ProfileStorage>,
    validator: Arc<dyn AttributeValidator>,
    runtime: Runtime,
    /// Latest save task per profile. Each task waits for the one it
    /// replaced, so saves of one profile land in the order they were queued.
    pending: Mutex<AHashMap<EntityId, JoinHandle<()>>>,
}

impl ProfileManager {
    pub fn new(
        storage: Arc<dyn ProfileStorage>,
        validator: Arc<dyn AttributeValidator>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("profile-save")
            .enable_all()
            .build()?;
        Ok(Self {
            profiles: DashMap::new(),
            storage,
            validator,
            runtime,
            pending: Mutex::new(AHashMap::new()),
        })
    }

    /// Return the cached profile, loading it from storage or creating a
    /// fresh one. Missing stats are seeded with registry defaults.
    ///
    /// A save still running for `id` is waited for before reading storage.
    /// Must not be called from inside an async runtime.
    pub fn load_or_create(&self, id: EntityId, name: &str) -> Result<Arc<EntityProfile>> {
        if let Some(existing) = self.profiles.get(&id) {
            existing.set_name(name);
            return Ok(Arc::clone(existing.value()));
        }

        let in_flight = self.pending.lock().remove(&id);
        if let Some(handle) = in_flight {
            self.wait(handle);
        }

        let profile = match self.storage.load(id)? {
            Some(snapshot) => EntityProfile::from_snapshot(snapshot, Arc::clone(&self.validator)),
            None => {
                tracing::info!("Creating new profile for {} ({})", name, id);
                EntityProfile::new(id, name, Arc::clone(&self.validator))
            }
        };
        profile.set_name(name);
        profile.apply_defaults();

        let profile = Arc::new(profile);
        let entry = self.profiles.entry(id).or_insert(profile);
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, id: EntityId) -> Option<Arc<EntityProfile>> {
        self.profiles.get(&id).map(|p| Arc::clone(p.value()))
    }

    pub fn profiles(&self) -> Vec<Arc<EntityProfile>> {
        self.profiles.iter().map(|p| Arc::clone(p.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Queue a background save of the profile's current state.
    /// Returns false if the profile is not loaded.
    pub fn save_async(&self, id: EntityId) -> bool {
        match self.get(id) {
            Some(profile) => {
                self.spawn_save(&profile);
                true
            }
            None => false,
        }
    }

    /// Save synchronously
    pub fn save_now(&self, id: EntityId) -> Result<()> {
        let profile = self.get(id).ok_or(NexusError::ProfileNotFound(id))?;
        self.storage.save(&profile.snapshot())
    }

    /// Drop the profile from the cache and save it in the background.
    ///
    /// The save is queued before the profile leaves the cache, so a
    /// concurrent `load_or_create` either finds the cached profile or waits
    /// for the save.
    pub fn unload(&self, id: EntityId) -> Option<Arc<EntityProfile>> {
        let profile = self.get(id)?;
        self.spawn_save(&profile);
        self.profiles.remove(&id);
        Some(profile)
    }

    /// Profiles with a save queued but not yet finished
    pub fn pending_saves(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.retain(|_, handle| !handle.is_finished());
        pending.len()
    }

    /// Block until every queued save has finished.
    ///
    /// Must not be called from inside an async runtime.
    pub fn flush(&self) {
        let handles: Vec<_> = self.pending.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            self.wait(handle);
        }
    }

    /// Drain pending saves, then save every cached profile synchronously and
    /// clear the cache. Every profile is attempted even if some fail.
    pub fn shutdown(&self) -> Result<()> {
        self.flush();

        let mut saved = 0;
        let mut failures = 0;
        for profile in self.profiles() {
            match self.storage.save(&profile.snapshot()) {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::error!("Failed to save profile {}: {}", profile.id(), e);
                    failures += 1;
                }
            }
        }
        self.profiles.clear();
        self.storage.close()?;
        tracing::info!("Saved {} profiles on shutdown", saved);

        if failures > 0 {
            return Err(NexusError::Storage(format!(
                "{} profiles failed to save on shutdown",
                failures
            )));
        }
        Ok(())
    }

    fn spawn_save(&self, profile: &EntityProfile) {
        let id = profile.id();
        let snapshot = profile.snapshot();
        let storage = Arc::clone(&self.storage);

        let mut pending = self.pending.lock();
        pending.retain(|_, handle| !handle.is_finished());
        let previous = pending.remove(&id);

        let handle = self.runtime.spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::error!("Profile save task failed: {}", e);
                }
            }
            let saved = tokio::task::spawn_blocking(move || storage.save(&snapshot)).await;
            match saved {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Failed to save profile {}: {}", id, e),
                Err(e) => tracing::error!("Profile save task failed: {}", e),
            }
        });
        pending.insert(id, handle);
    }

    fn wait(&self, handle: JoinHandle<()>) {
        if let Err(e) = self.runtime.block_on(handle) {
            tracing::error!("Profile save task failed: {}", e);
        }
    }
}

impl Lifecycle for ProfileManager {
    fn name(&self) -> &'static str {
        "profile-manager"
    }

    fn init(&self, _config: &EngineConfig) -> Result<()> {
        self.storage.initialize()
    }

    /// The attribute set may have changed; seed newly defined stats
    fn reload(&self, _config: &EngineConfig) -> Result<()> {
        for profile in self.profiles() {
            profile.apply_defaults();
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        ProfileManager::shutdown(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{InMemoryStorage, PermissiveValidator, ProfileSnapshot};
    use std::time::{Duration, Instant};

    fn manager() -> (Arc<InMemoryStorage>, ProfileManager) {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = ProfileManager::new(storage.clone(), Arc::new(PermissiveValidator)).unwrap();
        (storage, manager)
    }

    /// Storage whose writes take a while to land
    struct SlowStorage {
        inner: InMemoryStorage,
        delay: Duration,
    }

    impl ProfileStorage for SlowStorage {
        fn load(&self, id: EntityId) -> Result<Option<ProfileSnapshot>> {
            self.inner.load(id)
        }

        fn save(&self, snapshot: &ProfileSnapshot) -> Result<()> {
            std::thread::sleep(self.delay);
            self.inner.save(snapshot)
        }
    }

    fn slow_manager(delay: Duration) -> (Arc<SlowStorage>, ProfileManager) {
        let storage = Arc::new(SlowStorage {
            inner: InMemoryStorage::new(),
            delay,
        });
        let manager = ProfileManager::new(storage.clone(), Arc::new(PermissiveValidator)).unwrap();
        (storage, manager)
    }

    #[test]
    fn test_load_or_create_caches() {
        let (_, manager) = manager();
        let id = EntityId::new();
        let a = manager.load_or_create(id, "Alice").unwrap();
        let b = manager.load_or_create(id, "Alicia").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.name(), "Alicia");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_load_existing_from_storage() {
        let (storage, manager) = manager();
        let seed = EntityProfile::new(EntityId::new(), "Old", Arc::new(PermissiveValidator));
        seed.set_stat("level", 30.0);
        storage.insert(seed.snapshot());

        let loaded = manager.load_or_create(seed.id(), "Renamed").unwrap();
        assert_eq!(loaded.stat("level"), 30.0);
        assert_eq!(loaded.name(), "Renamed");
    }

    #[test]
    fn test_unload_saves_in_background() {
        let (storage, manager) = manager();
        let id = EntityId::new();
        let profile = manager.load_or_create(id, "Alice").unwrap();
        profile.set_stat("gold", 99.0);

        assert!(manager.unload(id).is_some());
        assert!(manager.get(id).is_none());

        manager.flush();
        assert_eq!(manager.pending_saves(), 0);
        assert_eq!(storage.get(id).unwrap().stats["gold"], 99.0);
    }

    #[test]
    fn test_shutdown_drains_and_saves_everything() {
        let (storage, manager) = manager();
        let ids: Vec<_> = (0..5).map(|_| EntityId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            let p = manager.load_or_create(*id, &format!("p{}", i)).unwrap();
            p.set_stat("level", i as f64);
        }
        manager.save_async(ids[0]);
        manager.unload(ids[1]);

        manager.shutdown().unwrap();

        assert!(manager.is_empty());
        assert_eq!(manager.pending_saves(), 0);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(storage.get(*id).unwrap().stats["level"], i as f64);
        }
    }

    #[test]
    fn test_reload_waits_for_save_in_flight() {
        let (storage, manager) = slow_manager(Duration::from_millis(200));
        let id = EntityId::new();
        manager.load_or_create(id, "Alice").unwrap().set_stat("gold", 500.0);

        manager.unload(id);
        let reloaded = manager.load_or_create(id, "Alice").unwrap();
        assert_eq!(reloaded.stat("gold"), 500.0);

        reloaded.set_stat("gold", 650.0);
        manager.shutdown().unwrap();
        assert_eq!(storage.inner.get(id).unwrap().stats["gold"], 650.0);
    }

    #[test]
    fn test_saves_of_one_profile_land_in_order() {
        let (storage, manager) = slow_manager(Duration::from_millis(20));
        let id = EntityId::new();
        let profile = manager.load_or_create(id, "Alice").unwrap();
        for gold in 1..=5 {
            profile.set_stat("gold", gold as f64);
            manager.save_async(id);
        }

        manager.flush();
        assert_eq!(storage.inner.get(id).unwrap().stats["gold"], 5.0);
        assert_eq!(storage.inner.save_count(), 5);
    }

    #[test]
    fn test_finished_saves_are_not_retained() {
        let (_, manager) = manager();
        let id = EntityId::new();
        manager.load_or_create(id, "Alice").unwrap();
        for _ in 0..1_000 {
            manager.save_async(id);
        }
        assert_eq!(manager.pending.lock().len(), 1);

        let others: Vec<_> = (0..100).map(|_| EntityId::new()).collect();
        for other in &others {
            manager.load_or_create(*other, "other").unwrap();
            manager.save_async(*other);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while !manager.pending.lock().values().all(|h| h.is_finished()) {
            assert!(Instant::now() < deadline, "saves did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }

        manager.save_async(id);
        assert_eq!(manager.pending.lock().len(), 1);
    }

    /// Storage that refuses to write one profile
    struct RejectingStorage {
        inner: InMemoryStorage,
        rejected: EntityId,
    }

    impl ProfileStorage for RejectingStorage {
        fn load(&self, id: EntityId) -> Result<Option<ProfileSnapshot>> {
            self.inner.load(id)
        }

        fn save(&self, snapshot: &ProfileSnapshot) -> Result<()> {
            if snapshot.uuid == self.rejected {
                return Err(NexusError::Storage("disk full".into()));
            }
            self.inner.save(snapshot)
        }
    }

    #[test]
    fn test_shutdown_reports_failures_and_saves_the_rest() {
        let rejected = EntityId::new();
        let storage = Arc::new(RejectingStorage {
            inner: InMemoryStorage::new(),
            rejected,
        });
        let manager = ProfileManager::new(storage.clone(), Arc::new(PermissiveValidator)).unwrap();
        let kept = EntityId::new();
        manager.load_or_create(rejected, "Broken").unwrap();
        manager.load_or_create(kept, "Fine").unwrap();

        assert!(matches!(manager.shutdown(), Err(NexusError::Storage(_))));
        assert!(manager.is_empty());
        assert!(storage.inner.get(kept).is_some());
        assert!(storage.inner.get(rejected).is_none());
    }

    #[test]
    fn test_save_now_unknown_profile() {
        let (_, manager) = manager();
        assert!(matches!(
            manager.save_now(EntityId::new()),
            Err(NexusError::ProfileNotFound(_))
        ));
    }
}
