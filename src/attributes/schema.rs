//! Attribute schema types for TOML deserialization.
//!
//! The attribute section of the configuration is an arbitrarily nested tree
//! of categories. A table carrying any marker field (`default`,
//! `status-value`, `display-name`) is an attribute; any other table is a
//! category. Classification happens once, here, so the registry only ever
//! walks a typed tree.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

pub const MARKER_DEFAULT: &str = "default";
pub const MARKER_STATUS_VALUE: &str = "status-value";
pub const MARKER_DISPLAY_NAME: &str = "display-name";

/// Leaf attribute as authored
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub display_name: Option<String>,
    pub default: f64,
    pub status_value: Option<i64>,
}

/// Node of the attribute schema tree
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Attribute(AttributeSpec),
    Category(IndexMap<String, SchemaNode>),
}

impl Default for SchemaNode {
    fn default() -> Self {
        SchemaNode::Category(IndexMap::new())
    }
}

impl SchemaNode {
    /// Classify a raw TOML tree. The root is always a category; scalar
    /// values where a table is expected are skipped.
    pub fn from_toml(value: &toml::Value) -> Self {
        match value.as_table() {
            Some(table) => SchemaNode::Category(classify_children(table)),
            None => SchemaNode::default(),
        }
    }

    /// Parse a schema from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let value: toml::Value = toml::from_str(content)?;
        Ok(Self::from_toml(&value))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SchemaNode::Attribute(_) => false,
            SchemaNode::Category(children) => children.is_empty(),
        }
    }

    /// Number of leaf attributes in the tree
    pub fn attribute_count(&self) -> usize {
        match self {
            SchemaNode::Attribute(_) => 1,
            SchemaNode::Category(children) => children.values().map(|c| c.attribute_count()).sum(),
        }
    }
}

impl<'de> Deserialize<'de> for SchemaNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = toml::Value::deserialize(deserializer)?;
        Ok(SchemaNode::from_toml(&value))
    }
}

fn classify_children(table: &toml::map::Map<String, toml::Value>) -> IndexMap<String, SchemaNode> {
    let mut children = IndexMap::new();
    for (key, value) in table {
        let Some(child) = value.as_table() else {
            tracing::debug!("Skipping non-table attribute schema entry '{}'", key);
            continue;
        };

        let node = if is_attribute(child) {
            SchemaNode::Attribute(parse_spec(child))
        } else {
            SchemaNode::Category(classify_children(child))
        };
        children.insert(key.clone(), node);
    }
    children
}

fn is_attribute(table: &toml::map::Map<String, toml::Value>) -> bool {
    table.contains_key(MARKER_DEFAULT)
        || table.contains_key(MARKER_STATUS_VALUE)
        || table.contains_key(MARKER_DISPLAY_NAME)
}

fn parse_spec(table: &toml::map::Map<String, toml::Value>) -> AttributeSpec {
    let display_name = table
        .get(MARKER_DISPLAY_NAME)
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let default = table.get(MARKER_DEFAULT).map(coerce_number).unwrap_or(0.0);

    let status_value = table.get(MARKER_STATUS_VALUE).and_then(|v| match v {
        toml::Value::Integer(i) => Some(*i),
        toml::Value::Float(f) => Some(*f as i64),
        _ => None,
    });

    AttributeSpec {
        display_name,
        default,
        status_value,
    }
}

/// Numeric coercion for default values; anything non-numeric becomes 0
fn coerce_number(value: &toml::Value) -> f64 {
    match value {
        toml::Value::Integer(i) => *i as f64,
        toml::Value::Float(f) => *f,
        toml::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}
