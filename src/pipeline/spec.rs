//! Per-subsystem phase maps as authored in configuration

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use crate::core::types::MODE_DEFAULT;

/// Ordered `name -> formula text` map
pub type FormulaMap = IndexMap<String, String>;

/// The Definition, Tools and Calculate phases of one subsystem
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineSpec {
    #[serde(
        default,
        alias = "Definition",
        alias = "Definitions",
        alias = "definitions",
        deserialize_with = "formula_map"
    )]
    pub definition: FormulaMap,

    #[serde(default, alias = "Tools", deserialize_with = "formula_map")]
    pub tools: FormulaMap,

    #[serde(default, alias = "Calculate")]
    pub calculate: CalculateSection,
}

impl PipelineSpec {
    /// Every formula in the spec as `(section label, name, text)`
    pub fn formulas(&self) -> Vec<(String, &str, &str)> {
        let mut out = Vec::new();
        for (name, text) in &self.definition {
            out.push(("Definition".to_string(), name.as_str(), text.as_str()));
        }
        for (name, text) in &self.tools {
            out.push(("Tools".to_string(), name.as_str(), text.as_str()));
        }
        match &self.calculate {
            CalculateSection::Flat(map) => {
                for (name, text) in map {
                    out.push(("Calculate".to_string(), name.as_str(), text.as_str()));
                }
            }
            CalculateSection::ByMode(modes) => {
                for (mode, map) in modes {
                    for (name, text) in map {
                        out.push((format!("Calculate.{}", mode), name.as_str(), text.as_str()));
                    }
                }
            }
        }
        out
    }
}

/// Calculate outputs, either one map for every mode or one map per mode tag
#[derive(Debug, Clone, PartialEq)]
pub enum CalculateSection {
    Flat(FormulaMap),
    ByMode(IndexMap<String, FormulaMap>),
}

impl Default for CalculateSection {
    fn default() -> Self {
        CalculateSection::Flat(FormulaMap::new())
    }
}

impl CalculateSection {
    /// Pick the outputs for `mode`, falling back to the `default` table.
    ///
    /// Returns the mode actually used (empty for a flat section).
    pub fn select(&self, mode: &str) -> Option<(&str, &FormulaMap)> {
        match self {
            CalculateSection::Flat(map) => Some(("", map)),
            CalculateSection::ByMode(modes) => find_mode(modes, mode)
                .or_else(|| find_mode(modes, MODE_DEFAULT)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CalculateSection::Flat(map) => map.is_empty(),
            CalculateSection::ByMode(modes) => modes.values().all(|m| m.is_empty()),
        }
    }
}

fn find_mode<'a>(
    modes: &'a IndexMap<String, FormulaMap>,
    mode: &str,
) -> Option<(&'a str, &'a FormulaMap)> {
    modes
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(mode))
        .map(|(name, map)| (name.as_str(), map))
}

impl<'de> Deserialize<'de> for CalculateSection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = toml::Value::deserialize(deserializer)?;
        let table = match value {
            toml::Value::Table(table) => table,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "Calculate must be a table, found {}",
                    other.type_str()
                )))
            }
        };

        // A table whose every entry is itself a table is keyed by mode
        if !table.is_empty() && table.values().all(|v| v.is_table()) {
            let mut modes = IndexMap::new();
            for (mode, inner) in table {
                let map = match inner {
                    toml::Value::Table(t) => formula_entries(t).map_err(serde::de::Error::custom)?,
                    _ => FormulaMap::new(),
                };
                modes.insert(mode, map);
            }
            return Ok(CalculateSection::ByMode(modes));
        }

        formula_entries(table)
            .map(CalculateSection::Flat)
            .map_err(serde::de::Error::custom)
    }
}

/// Formula maps accept bare numbers as constant formulas
fn formula_map<'de, D>(deserializer: D) -> Result<FormulaMap, D::Error>
where
    D: Deserializer<'de>,
{
    let table = toml::map::Map::<String, toml::Value>::deserialize(deserializer)?;
    formula_entries(table).map_err(serde::de::Error::custom)
}

fn formula_entries(table: toml::map::Map<String, toml::Value>) -> Result<FormulaMap, String> {
    let mut map = FormulaMap::new();
    for (name, value) in table {
        let text = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            other => {
                return Err(format!(
                    "formula '{}' must be a string or number, found {}",
                    name,
                    other.type_str()
                ))
            }
        };
        map.insert(name, text);
    }
    Ok(map)
}
