//! Dependency graph of desired resources and its topological ordering.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use tracing::trace;

use crate::error::PlanError;

use super::resource::{Resource, ResourceId};

/// Desired resources in declaration order, with dependency edges.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Resources in declaration order.
    resources: Vec<Resource>,
    /// Position of each resource in `resources`.
    index: HashMap<ResourceId, usize>,
}

impl ResourceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource at the end of the declaration order.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource` if the id is already present.
    pub fn insert(&mut self, resource: Resource) -> Result<(), PlanError> {
        if self.index.contains_key(&resource.id) {
            return Err(PlanError::DuplicateResource {
                id: resource.id.to_string(),
            });
        }

        self.index.insert(resource.id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    /// Adds a dependency edge: `resource` depends on `dependency`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDependency` if either id is not in the graph.
    pub fn add_dependency(
        &mut self,
        resource: &ResourceId,
        dependency: &ResourceId,
    ) -> Result<(), PlanError> {
        let unknown = || PlanError::UnknownDependency {
            resource: resource.to_string(),
            dependency: dependency.to_string(),
        };

        if !self.index.contains_key(dependency) {
            return Err(unknown());
        }
        let pos = *self.index.get(resource).ok_or_else(unknown)?;
        self.resources[pos].depends_on.insert(dependency.clone());
        Ok(())
    }

    /// Gets a resource by id.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&pos| &self.resources[pos])
    }

    /// Returns true if the graph contains the id.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the number of resources.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterates over resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Returns resources ordered so that each appears after all its dependencies.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDependency` for an edge to a resource outside the
    /// graph, and `Cycle` if the dependency relation is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<&Resource>, PlanError> {
        for resource in &self.resources {
            if let Some(missing) = resource.depends_on.iter().find(|d| !self.contains(d)) {
                return Err(PlanError::UnknownDependency {
                    resource: resource.id.to_string(),
                    dependency: missing.to_string(),
                });
            }
        }

        let nodes: Vec<_> = self
            .resources
            .iter()
            .map(|r| (&r.id, &r.depends_on))
            .collect();

        let order = order_nodes(&nodes)?;
        Ok(order.into_iter().map(|pos| &self.resources[pos]).collect())
    }
}

/// Orders nodes so that every node follows its dependencies (Kahn's algorithm).
///
/// Returns positions into `nodes`. Among ready nodes the lowest position goes
/// first. Dependencies on ids outside `nodes` are ignored.
///
/// # Errors
///
/// Returns `Cycle` listing the nodes that could not be ordered.
pub fn order_nodes(nodes: &[(&ResourceId, &BTreeSet<ResourceId>)]) -> Result<Vec<usize>, PlanError> {
    let position: HashMap<&ResourceId, usize> =
        nodes.iter().enumerate().map(|(pos, (id, _))| (*id, pos)).collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (pos, (_, deps)) in nodes.iter().enumerate() {
        for dep in deps.iter() {
            if let Some(&dep_pos) = position.get(dep) {
                in_degree[pos] += 1;
                dependents[dep_pos].push(pos);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(pos, _)| Reverse(pos))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(pos)) = ready.pop() {
        trace!("Ordered {}", nodes[pos].0);
        order.push(pos);
        for &dependent in &dependents[pos] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        let resources = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(pos, _)| nodes[pos].0.to_string())
            .collect();
        return Err(PlanError::Cycle { resources });
    }

    Ok(order)
}
