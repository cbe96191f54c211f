//! Class advancement tree
//!
//! Classes live in an arena; parent and child links are indices into it.

use serde::{Deserialize, Serialize};

use crate::core::config::ClassConfig;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassIdx(pub u32);

#[derive(Debug, Clone)]
pub struct ClassNode {
    pub name: String,
    pub display_name: String,
    pub tier: u32,
    pub parent: Option<ClassIdx>,
    pub children: Vec<ClassIdx>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassTree {
    nodes: Vec<ClassNode>,
    roots: Vec<ClassIdx>,
}

impl ClassTree {
    /// Build from `[classes]`. Nodes are created first, then linked, so a
    /// parent may be declared after its children.
    pub fn build(classes: &IndexMap<String, ClassConfig>) -> Self {
        let mut tree = ClassTree {
            nodes: classes
                .iter()
                .map(|(name, config)| ClassNode {
                    name: name.clone(),
                    display_name: config.display_name.clone().unwrap_or_else(|| name.clone()),
                    tier: config.tier,
                    parent: None,
                    children: Vec::new(),
                })
                .collect(),
            roots: Vec::new(),
        };

        for (i, config) in classes.values().enumerate() {
            let idx = ClassIdx(i as u32);
            let parent = config.parent.as_deref().and_then(|p| tree.find(p));
            match parent {
                Some(parent) if parent != idx => {
                    tree.nodes[i].parent = Some(parent);
                    tree.nodes[parent.0 as usize].children.push(idx);
                }
                _ if config.tier <= 1 => tree.roots.push(idx),
                _ => tracing::warn!(
                    "Class '{}' (tier {}) has no valid parent {:?}; it is unreachable",
                    tree.nodes[i].name,
                    config.tier,
                    config.parent
                ),
            }
        }

        tracing::info!(
            "Built class tree: {} classes, {} roots",
            tree.nodes.len(),
            tree.roots.len()
        );
        tree
    }

    fn find(&self, name: &str) -> Option<ClassIdx> {
        self.nodes
            .iter()
            .position(|n| n.name.eq_ignore_ascii_case(name))
            .map(|i| ClassIdx(i as u32))
    }

    pub fn get(&self, name: &str) -> Option<(ClassIdx, &ClassNode)> {
        let idx = self.find(name)?;
        Some((idx, &self.nodes[idx.0 as usize]))
    }

    pub fn node(&self, idx: ClassIdx) -> Option<&ClassNode> {
        self.nodes.get(idx.0 as usize)
    }

    pub fn roots(&self) -> &[ClassIdx] {
        &self.roots
    }

    pub fn children(&self, idx: ClassIdx) -> &[ClassIdx] {
        self.node(idx).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, idx: ClassIdx) -> Option<ClassIdx> {
        self.node(idx)?.parent
    }

    /// Whether `target` is a direct child of `current`
    pub fn can_advance(&self, current: &str, target: &str) -> bool {
        match (self.find(current), self.find(target)) {
            (Some(current), Some(target)) => self.children(current).contains(&target),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
