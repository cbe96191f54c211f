//! Engine configuration loaded from TOML.
//!
//! Section layout:
//!
//! ```toml
//! [general]
//! debug-mode = false
//! log-filter = "nexus_core=info"
//!
//! [attributes.Combat.attack]     # nested categories, leaves carry markers
//! default = 5
//!
//! [classes.Knight]
//! tier = 2
//! parent = "Novice"
//!
//! [battle.Damage-Category.Attack-Type]
//! melee = 1.5
//!
//! [battle.Calculate.adversarial]
//! final = "%atk% * %context_multiplier%"
//!
//! [systems.Health.Calculate]
//! max_health = "100 + %level% * 10"
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::attributes::SchemaNode;
use crate::core::error::Result;
use crate::formula::compile;
use crate::pipeline::{BattleConfig, PipelineSpec};

pub const DEFAULT_LOG_FILTER: &str = "nexus_core=info";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub attributes: SchemaNode,

    #[serde(default)]
    pub classes: IndexMap<String, ClassConfig>,

    #[serde(default)]
    pub battle: Option<BattleConfig>,

    /// Normal status systems by name, run in this order
    #[serde(default)]
    pub systems: IndexMap<String, PipelineSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneralConfig {
    #[serde(default)]
    pub debug_mode: bool,

    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassConfig {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default = "default_tier")]
    pub tier: u32,

    #[serde(default)]
    pub parent: Option<String>,
}

fn default_tier() -> u32 {
    1
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            "Loaded config {}: {} attributes, {} classes, {} systems",
            path.display(),
            config.attributes.attribute_count(),
            config.classes.len(),
            config.systems.len()
        );
        Ok(config)
    }

    /// Check that every formula compiles and every class parent exists.
    /// Returns one message per problem.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();

        let pipelines = self
            .battle
            .iter()
            .map(|b| ("battle".to_string(), &b.pipeline))
            .chain(self.systems.iter().map(|(name, spec)| (format!("systems.{}", name), spec)));

        for (owner, spec) in pipelines {
            for (section, name, text) in spec.formulas() {
                if let Err(e) = compile(text) {
                    problems.push(format!("{}.{}.{}: {}", owner, section, name, e));
                }
            }
        }

        for (name, class) in &self.classes {
            if let Some(parent) = &class.parent {
                if !self.classes.keys().any(|k| k.eq_ignore_ascii_case(parent)) {
                    problems.push(format!("classes.{}: unknown parent '{}'", name, parent));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        debug-mode = true

        [attributes.Combat.attack]
        default = 5
        display-name = "Attack"

        [attributes.Stats.level]
        default = 1

        [classes.Novice]
        tier = 1

        [classes.Knight]
        display-name = "Knight"
        tier = 2
        parent = "Novice"

        [battle.Damage-Category.Attack-Type]
        melee = 1.5

        [battle.Definitions]
        atk = "%entity-status#attack%"

        [battle.Calculate.adversarial]
        final = "%atk% * %context_multiplier%"

        [systems.Health.Definition]
        max_health = "%entity-status#max_health%"

        [systems.Health.Calculate]
        max_health = "100 + %entity-status#level% * 10"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();

        assert!(config.general.debug_mode);
        assert_eq!(config.general.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.attributes.attribute_count(), 2);
        assert_eq!(config.classes["Knight"].parent.as_deref(), Some("Novice"));
        assert_eq!(config.classes["Novice"].display_name, None);

        let battle = config.battle.as_ref().unwrap();
        assert_eq!(battle.categories["Attack-Type"]["melee"].multiplier(), 1.5);
        assert_eq!(battle.pipeline.definition["atk"], "%entity-status#attack%");
        assert!(config.systems.contains_key("Health"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert!(!config.general.debug_mode);
        assert!(config.attributes.is_empty());
        assert!(config.battle.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = EngineConfig::from_toml_str(
            r#"
            [classes.Paladin]
            tier = 3
            parent = "Knight"

            [systems.Mana.Tools]
            bad = "1 +"

            [systems.Mana.Calculate]
            worse = "foo(1)"
            fine = "2"
            "#,
        )
        .unwrap();

        let problems = config.validate().unwrap_err();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.starts_with("systems.Mana.Tools.bad")));
        assert!(problems.iter().any(|p| p.starts_with("systems.Mana.Calculate.worse")));
        assert!(problems.iter().any(|p| p.contains("unknown parent 'Knight'")));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = EngineConfig::load_file(&path).unwrap();
        assert_eq!(config.classes.len(), 2);

        assert!(EngineConfig::load_file(dir.path().join("missing.toml")).is_err());
    }
}
