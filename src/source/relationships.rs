//! Relationship Load Specifications
//!
//! Reports frequently need related resources (an order's customer, a
//! customer's territory) loaded alongside the driving resource. The loader
//! turns a relationship tree into a depth-limited load specification the data
//! layer can execute.

use serde::{Deserialize, Serialize};

/// How a relationship should be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Load together with the parent query.
    Eager,
    /// Defer until first access.
    Lazy,
    /// Load only the named fields.
    Selective(Vec<String>),
}

/// A relationship as declared by a report definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub children: Vec<RelationshipDef>,
}

/// One node of a load specification handed to the data layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub relationship: String,
    #[serde(default = "default_strategy")]
    pub strategy: LoadStrategy,
    #[serde(default)]
    pub children: Vec<LoadSpec>,
}

fn default_strategy() -> LoadStrategy {
    LoadStrategy::Eager
}

impl Default for LoadStrategy {
    fn default() -> Self {
        LoadStrategy::Eager
    }
}

/// Builds load specifications with a depth cap. Relationships past the cap
/// degrade to lazy so a deep (or cyclic) declaration can never force an
/// unbounded eager join.
#[derive(Debug, Clone)]
pub struct RelationshipLoader {
    max_depth: usize,
}

impl RelationshipLoader {
    pub fn new(max_depth: usize) -> Self {
        RelationshipLoader { max_depth }
    }

    /// Build a load specification for the given relationship declarations.
    pub fn build(&self, defs: &[RelationshipDef]) -> Vec<LoadSpec> {
        defs.iter().map(|d| self.build_node(d, 1)).collect()
    }

    fn build_node(&self, def: &RelationshipDef, depth: usize) -> LoadSpec {
        let strategy = if depth > self.max_depth {
            LoadStrategy::Lazy
        } else if def.fields.is_empty() {
            LoadStrategy::Eager
        } else {
            LoadStrategy::Selective(def.fields.clone())
        };

        let children = if depth >= self.max_depth {
            Vec::new()
        } else {
            def.children
                .iter()
                .map(|c| self.build_node(c, depth + 1))
                .collect()
        };

        LoadSpec {
            relationship: def.name.clone(),
            strategy,
            children,
        }
    }
}

impl Default for RelationshipLoader {
    fn default() -> Self {
        // Three levels covers every report shape seen so far.
        RelationshipLoader::new(3)
    }
}
