//! Dependency graph logic for ordering entity loads
//!
//! This module provides functions to:
//! - Build a dependency graph from descriptor references
//! - Layer entity types into load passes (Kahn's algorithm)
//! - Report the offending cycle when no ordering exists
//! - Find every type that transitively depends on a given type

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::schema::SchemaRegistry;

/// Entity types that can be loaded together: none of them references another
/// type in the same pass (self-references aside)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadPass {
    /// 0-based pass number
    pub index: usize,
    /// Entity types in registration order
    pub entity_types: Vec<String>,
}

/// Error building or ordering the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A reference points at a type that is not registered
    UnknownEntityType {
        entity_type: String,
        referenced_by: String,
    },
    /// A reference's key shape does not match the target's natural key
    ReferenceKeyMismatch {
        referenced_by: String,
        target: String,
        reference_parts: usize,
        key_parts: usize,
    },
    /// Types that reference each other in a loop; `cycle` starts and ends
    /// with the same type
    CyclicDependency { cycle: Vec<String> },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::UnknownEntityType {
                entity_type,
                referenced_by,
            } => {
                write!(
                    f,
                    "Unknown entity type '{}' referenced by '{}'",
                    entity_type, referenced_by
                )
            }
            GraphError::ReferenceKeyMismatch {
                referenced_by,
                target,
                reference_parts,
                key_parts,
            } => {
                write!(
                    f,
                    "Reference '{}' supplies {} key part(s) but '{}' has a {}-part natural key",
                    referenced_by, reference_parts, target, key_parts
                )
            }
            GraphError::CyclicDependency { cycle } => {
                write!(f, "Circular dependency detected: {}", cycle.join(" -> "))
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Dependency graph over registered entity types
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Types in registration order
    order: Vec<String>,
    /// Adjacency list: entity -> entities it depends on (has references to)
    dependencies: HashMap<String, BTreeSet<String>>,
    /// Reverse adjacency: entity -> entities that depend on it
    dependents: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph from every registered descriptor
    pub fn build(registry: &SchemaRegistry) -> Result<Self, GraphError> {
        let mut graph = DependencyGraph::default();

        for descriptor in registry.all_types() {
            graph.order.push(descriptor.name.clone());
            graph.dependents.entry(descriptor.name.clone()).or_default();

            let mut deps = BTreeSet::new();
            for field in descriptor.foreign_keys() {
                let Some(reference) = &field.reference else {
                    continue;
                };
                let referenced_by = format!("{}.{}", descriptor.name, field.name);

                let target = registry.describe(&reference.target).map_err(|_| {
                    GraphError::UnknownEntityType {
                        entity_type: reference.target.clone(),
                        referenced_by: referenced_by.clone(),
                    }
                })?;

                if target.natural_key.len() != reference.key_arity() {
                    return Err(GraphError::ReferenceKeyMismatch {
                        referenced_by,
                        target: target.name.clone(),
                        reference_parts: reference.key_arity(),
                        key_parts: target.natural_key.len(),
                    });
                }

                // Don't include self-references
                if reference.target != descriptor.name {
                    deps.insert(reference.target.clone());
                }
            }

            graph.dependencies.insert(descriptor.name.clone(), deps);
        }

        // Update reverse adjacency
        for (name, deps) in &graph.dependencies {
            for dep in deps {
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }

        Ok(graph)
    }

    /// Direct dependencies of a type (self-references excluded)
    pub fn dependencies_of(&self, entity_type: &str) -> impl Iterator<Item = &String> {
        self.dependencies.get(entity_type).into_iter().flatten()
    }

    /// Direct dependents of a type
    pub fn dependents_of(&self, entity_type: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(entity_type).into_iter().flatten()
    }

    /// Layer types into load passes.
    ///
    /// Each pass holds every type whose dependencies were all placed in
    /// earlier passes, in registration order.
    pub fn load_passes(&self) -> Result<Vec<LoadPass>, GraphError> {
        // Count of unplaced dependencies per type
        let mut pending: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), self.dependencies_of(name).count()))
            .collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut passes = Vec::new();

        loop {
            let ready: Vec<&str> = self
                .order
                .iter()
                .map(String::as_str)
                .filter(|name| !placed.contains(name))
                .filter(|name| pending.get(name) == Some(&0))
                .collect();

            if ready.is_empty() {
                break;
            }

            for name in &ready {
                placed.insert(name);
                for dependent in self.dependents_of(name) {
                    if let Some(count) = pending.get_mut(dependent.as_str()) {
                        *count -= 1;
                    }
                }
            }

            passes.push(LoadPass {
                index: passes.len(),
                entity_types: ready.into_iter().map(String::from).collect(),
            });
        }

        if placed.len() != self.order.len() {
            let remaining: HashSet<&str> = self
                .order
                .iter()
                .map(String::as_str)
                .filter(|name| !placed.contains(name))
                .collect();
            return Err(GraphError::CyclicDependency {
                cycle: self.find_cycle(&remaining),
            });
        }

        Ok(passes)
    }

    /// Flattened insert order (dependencies before dependents)
    pub fn insert_order(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .load_passes()?
            .into_iter()
            .flat_map(|pass| pass.entity_types)
            .collect())
    }

    /// Every type that depends on `entity_type`, directly or transitively
    pub fn transitive_dependents(&self, entity_type: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = vec![entity_type];

        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(current) {
                if found.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }

        found.remove(entity_type);
        found
    }

    /// Walk remaining types until one repeats.
    ///
    /// Every type left after layering still has an unplaced dependency, so
    /// following the first such dependency from any of them must loop.
    fn find_cycle(&self, remaining: &HashSet<&str>) -> Vec<String> {
        let Some(start) = self.order.iter().find(|name| remaining.contains(name.as_str())) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut current = start.as_str();

        loop {
            if let Some(pos) = path.iter().position(|name| *name == current) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            path.push(current);

            let next = self
                .dependencies_of(current)
                .find(|dep| remaining.contains(dep.as_str()));

            match next {
                Some(dep) => current = dep.as_str(),
                None => return path.iter().map(|s| s.to_string()).collect(),
            }
        }
    }
}
