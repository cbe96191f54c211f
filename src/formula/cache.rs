//! Compiled-formula cache keyed by (namespace, section, key).
//!
//! Identity is the key triple, not the formula text. When configuration text
//! changes the cache must be cleared, which happens wholesale on reload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::expression::{Expr, ParseError};
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::lifecycle::Lifecycle;

/// Which part of a pipeline a formula belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Definition,
    Tools,
    Calculate,
    /// One-off formulas keyed by their own text
    Adhoc,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Definition => "Definition",
            Section::Tools => "Tools",
            Section::Calculate => "Calculate",
            Section::Adhoc => "Adhoc",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: String,
    section: Section,
    key: String,
}

/// Thread-safe memo of compiled formulas
pub struct FormulaCache {
    entries: DashMap<CacheKey, Arc<Expr>, ahash::RandomState>,
    compilations: AtomicU64,
}

impl FormulaCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(ahash::RandomState::new()),
            compilations: AtomicU64::new(0),
        }
    }

    /// Return the cached AST for the key, compiling `text` on a miss.
    ///
    /// Failed compilations are not stored, so the next call retries.
    pub fn get_or_compile(
        &self,
        namespace: &str,
        section: Section,
        key: &str,
        text: &str,
    ) -> std::result::Result<Arc<Expr>, ParseError> {
        let cache_key = CacheKey {
            namespace: namespace.to_string(),
            section,
            key: key.to_string(),
        };

        if let Some(hit) = self.entries.get(&cache_key) {
            return Ok(Arc::clone(hit.value()));
        }

        // Compile outside the shard lock; a racing thread may compile the
        // same key, and whichever insert lands first is kept.
        tracing::debug!("Compiling formula {}/{}/{}", namespace, section, key);
        let compiled = Arc::new(Expr::parse(text)?);
        self.compilations.fetch_add(1, Ordering::Relaxed);

        let entry = self.entries.entry(cache_key).or_insert(compiled);
        Ok(Arc::clone(entry.value()))
    }

    /// Look up without compiling
    pub fn get(&self, namespace: &str, section: Section, key: &str) -> Option<Arc<Expr>> {
        let cache_key = CacheKey {
            namespace: namespace.to_string(),
            section,
            key: key.to_string(),
        };
        self.entries.get(&cache_key).map(|e| Arc::clone(e.value()))
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total successful compilations since creation
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}

impl Default for FormulaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for FormulaCache {
    fn name(&self) -> &'static str {
        "formula-cache"
    }

    fn init(&self, _config: &EngineConfig) -> Result<()> {
        Ok(())
    }

    fn reload(&self, _config: &EngineConfig) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_hit_returns_same_ast() {
        let cache = FormulaCache::new();
        let a = cache
            .get_or_compile("Health", Section::Calculate, "max_health", "level * 10")
            .unwrap();
        let b = cache
            .get_or_compile("Health", Section::Calculate, "max_health", "level * 10")
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.compilations(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identity_is_key_not_text() {
        let cache = FormulaCache::new();
        cache
            .get_or_compile("Health", Section::Tools, "base", "1 + 1")
            .unwrap();
        // Different text, same key: the stale compiled form is served
        let stale = cache
            .get_or_compile("Health", Section::Tools, "base", "40 + 2")
            .unwrap();
        let vars: HashMap<String, f64> = HashMap::new();
        assert_eq!(stale.evaluate(&vars).unwrap(), 2.0);

        cache.clear();
        let fresh = cache
            .get_or_compile("Health", Section::Tools, "base", "40 + 2")
            .unwrap();
        assert_eq!(fresh.evaluate(&vars).unwrap(), 42.0);
    }

    #[test]
    fn test_keys_are_scoped() {
        let cache = FormulaCache::new();
        cache.get_or_compile("Health", Section::Tools, "x", "1").unwrap();
        cache.get_or_compile("Mana", Section::Tools, "x", "2").unwrap();
        cache.get_or_compile("Health", Section::Calculate, "x", "3").unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_compile_errors_not_cached() {
        let cache = FormulaCache::new();
        assert!(cache
            .get_or_compile("Battle", Section::Tools, "bad", "1 +")
            .is_err());
        assert!(cache.is_empty());
        assert!(cache.get("Battle", Section::Tools, "bad").is_none());
    }

    #[test]
    fn test_concurrent_population() {
        let cache = Arc::new(FormulaCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for k in 0..50 {
                        let key = format!("k{}", k % 10);
                        cache
                            .get_or_compile("Battle", Section::Calculate, &key, "a * 2 + b")
                            .unwrap();
                    }
                    i
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
