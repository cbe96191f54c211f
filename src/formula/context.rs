//! Evaluation context bridging formula variables to live profiles.
//!
//! Lookups go through three tiers: explicit bindings made by the pipeline,
//! dynamic references of the form `entity-status#<attribute>#<role>`, and
//! the role-prefixed shorthand `attacker_<attribute>` / `defender_<attribute>`.
//! The last two read straight from the bound profile's stat store.

use ahash::AHashMap;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::expression::Scope;
use crate::core::types::Role;
use crate::profile::EntityProfile;

/// Prefix of a dynamic attribute reference
pub const DYNAMIC_PREFIX: &str = "entity-status#";
/// Older configs spell the prefix this way
pub const LEGACY_DYNAMIC_PREFIX: &str = "player-status#";
/// Shorthand for a stat of the primary entity
pub const ATTACKER_PREFIX: &str = "attacker_";
/// Shorthand for a stat of the secondary entity
pub const DEFENDER_PREFIX: &str = "defender_";

/// Pluggable randomness for `random(lo, hi)`
pub trait RandomSource: Send + Sync {
    /// Uniform sample in `[0, 1)`
    fn next_unit(&self) -> f64;
}

/// Thread-local RNG, the default source
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic source for tests and replays
pub struct SeededRandom {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

static THREAD_RANDOM: ThreadRandom = ThreadRandom;

/// A parsed `entity-status#<attribute>#<role>` reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicRef<'a> {
    pub attribute: &'a str,
    pub role: Role,
}

/// Parse a variable name as a dynamic attribute reference.
///
/// Returns `None` when the name does not use the dynamic prefix or names no
/// attribute.
pub fn parse_dynamic_ref(name: &str) -> Option<DynamicRef<'_>> {
    let body = name
        .strip_prefix(DYNAMIC_PREFIX)
        .or_else(|| name.strip_prefix(LEGACY_DYNAMIC_PREFIX))?;

    let mut parts = body.splitn(2, '#');
    let attribute = parts.next().unwrap_or("").trim();
    if attribute.is_empty() {
        return None;
    }
    let role = parts.next().map(Role::from_suffix).unwrap_or_default();
    Some(DynamicRef { attribute, role })
}

/// Parse `attacker_<attribute>` or `defender_<attribute>`
pub fn parse_role_ref(name: &str) -> Option<DynamicRef<'_>> {
    let (attribute, role) = match name.strip_prefix(ATTACKER_PREFIX) {
        Some(rest) => (rest, Role::Primary),
        None => (name.strip_prefix(DEFENDER_PREFIX)?, Role::Secondary),
    };
    if attribute.is_empty() {
        return None;
    }
    Some(DynamicRef { attribute, role })
}

/// Per-invocation variable scope
pub struct EvalContext<'a> {
    bindings: AHashMap<String, f64>,
    primary: Option<&'a EntityProfile>,
    secondary: Option<&'a EntityProfile>,
    random: &'a dyn RandomSource,
}

impl<'a> EvalContext<'a> {
    pub fn new(primary: Option<&'a EntityProfile>, secondary: Option<&'a EntityProfile>) -> Self {
        Self {
            bindings: AHashMap::new(),
            primary,
            secondary,
            random: &THREAD_RANDOM,
        }
    }

    /// Context with no bound entities
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    /// Context bound to a single entity
    pub fn solo(primary: &'a EntityProfile) -> Self {
        Self::new(Some(primary), None)
    }

    pub fn with_random(mut self, random: &'a dyn RandomSource) -> Self {
        self.random = random;
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: f64) {
        self.bindings.insert(name.into(), value);
    }

    pub fn binding(&self, name: &str) -> Option<f64> {
        self.bindings.get(name).copied()
    }

    pub fn bindings(&self) -> &AHashMap<String, f64> {
        &self.bindings
    }

    pub fn primary(&self) -> Option<&'a EntityProfile> {
        self.primary
    }

    pub fn secondary(&self) -> Option<&'a EntityProfile> {
        self.secondary
    }

    pub fn entity(&self, role: Role) -> Option<&'a EntityProfile> {
        match role {
            Role::Primary => self.primary,
            Role::Secondary => self.secondary,
        }
    }

    /// Resolve a variable. Never fails; unknown names read as `0.0`.
    pub fn resolve(&self, name: &str) -> f64 {
        if let Some(value) = self.bindings.get(name) {
            return *value;
        }

        match parse_dynamic_ref(name).or_else(|| parse_role_ref(name)) {
            Some(reference) => self
                .entity(reference.role)
                .map(|profile| profile.stat(reference.attribute))
                .unwrap_or(0.0),
            None => 0.0,
        }
    }
}

impl Scope for EvalContext<'_> {
    fn variable(&self, name: &str) -> f64 {
        self.resolve(name)
    }

    fn random(&self, low: f64, high: f64) -> f64 {
        low + self.random.next_unit() * (high - low)
    }
}
