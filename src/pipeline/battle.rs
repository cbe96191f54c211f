//! Battle damage: a context multiplier from damage tags, then the battle
//! pipeline.

use indexmap::IndexMap;
use serde::Deserialize;

use super::orchestrator::{Invocation, Pipeline, PipelineOutcome};
use super::spec::PipelineSpec;
use crate::profile::EntityProfile;

/// Namespace of the battle pipeline in the formula cache
pub const BATTLE_NAMESPACE: &str = "Battle";
pub const CONTEXT_MULTIPLIER: &str = "context_multiplier";
pub const BASE_DAMAGE: &str = "base_damage";

/// One damage-category value: a bare multiplier or a described entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CategoryEntry {
    Multiplier(f64),
    Detail(CategoryDetail),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CategoryDetail {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_multiplier")]
    pub default_multiplier: f64,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl CategoryEntry {
    pub fn multiplier(&self) -> f64 {
        match self {
            CategoryEntry::Multiplier(m) => *m,
            CategoryEntry::Detail(detail) => detail.default_multiplier,
        }
    }
}

/// category -> value -> entry, e.g. `Attack-Type.melee = 1.5`
pub type DamageCategories = IndexMap<String, IndexMap<String, CategoryEntry>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BattleConfig {
    #[serde(default, rename = "Damage-Category", alias = "damage-category")]
    pub categories: DamageCategories,

    #[serde(flatten)]
    pub pipeline: PipelineSpec,
}

/// A damage tag, `category.value` or `category:value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamageTag {
    pub category: String,
    pub value: String,
}

impl DamageTag {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (category, value) = raw.split_once(|c| c == '.' || c == ':')?;
        let (category, value) = (category.trim(), value.trim());
        if category.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self::new(category, value))
    }
}

/// Product of the multipliers of every matching tag. Unmatched tags are
/// ignored and no tags give `1.0`.
pub fn resolve_context_multiplier(categories: &DamageCategories, tags: &[DamageTag]) -> f64 {
    tags.iter()
        .filter_map(|tag| {
            let values = lookup(categories, &tag.category)?;
            let entry = lookup(values, &tag.value)?;
            Some(entry.multiplier())
        })
        .product()
}

fn lookup<'a, V>(map: &'a IndexMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key)
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
}

#[derive(Debug, Clone, Default)]
pub struct BattleRequest {
    pub tags: Vec<DamageTag>,
    pub mode: Option<String>,
    /// Raw damage reported by the host event
    pub base_damage: Option<f64>,
}

impl BattleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, category: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(DamageTag::new(category, value));
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn base_damage(mut self, damage: f64) -> Self {
        self.base_damage = Some(damage);
        self
    }
}

/// Run the battle pipeline for an attacker against an optional defender
pub fn compute_damage(
    pipeline: &Pipeline,
    config: &BattleConfig,
    attacker: &EntityProfile,
    defender: Option<&EntityProfile>,
    request: &BattleRequest,
) -> PipelineOutcome {
    let multiplier = resolve_context_multiplier(&config.categories, &request.tags);
    tracing::debug!("Battle context multiplier {} from {} tags", multiplier, request.tags.len());

    let mut invocation = match defender {
        Some(defender) => Invocation::versus(attacker, defender),
        None => Invocation::solo(attacker),
    }
    .bind(CONTEXT_MULTIPLIER, multiplier);

    if let Some(damage) = request.base_damage {
        invocation = invocation.bind(BASE_DAMAGE, damage);
    }
    if let Some(mode) = &request.mode {
        invocation = invocation.with_mode(mode.clone());
    }

    pipeline.run(BATTLE_NAMESPACE, &config.pipeline, &invocation)
}
