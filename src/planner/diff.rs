//! Diff engine for comparing desired vs applied state.
//!
//! This module computes, per resource, whether it must be created, updated,
//! deleted or left alone, with field-level details for updates.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::PlanError;
use crate::graph::{Attributes, Resource, ResourceGraph, ResourceId, order_nodes};
use crate::state::{AppliedState, StackState};

/// Engine for computing diffs between the desired graph and applied state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// A single attribute that differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Attribute key.
    pub field: String,
    /// Value before the change, `None` if the key was absent.
    pub old: Option<Value>,
    /// Value after the change, `None` if the key is removed.
    pub new: Option<Value>,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource id.
    pub id: ResourceId,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Changed attributes (updates only).
    pub changes: Vec<FieldChange>,
    /// Desired resource (creates, updates and unchanged resources).
    pub desired: Option<Resource>,
    /// Applied record (updates, deletes and unchanged resources).
    pub applied: Option<AppliedState>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Complete diff result, in execution order.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Resource diffs: desired resources in dependency order, then deletes.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

/// Compares two attribute maps key by key.
///
/// Keys present on either side are compared; the result is sorted by key.
#[must_use]
pub fn compare_attributes(old: &Attributes, new: &Attributes) -> Vec<FieldChange> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let (before, after) = (old.get(key), new.get(key));
            (before != after).then(|| FieldChange {
                field: key.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect()
}

/// Compares only the keys of `recorded` against `live`.
///
/// Keys the live side has in addition (provider-computed fields) are ignored.
#[must_use]
pub fn compare_recorded(recorded: &Attributes, live: &Attributes) -> Vec<FieldChange> {
    recorded
        .iter()
        .filter_map(|(key, value)| {
            let current = live.get(key);
            (current != Some(value)).then(|| FieldChange {
                field: key.clone(),
                old: Some(value.clone()),
                new: current.cloned(),
            })
        })
        .collect()
}

/// Orders recorded resources so that dependents come before their dependencies.
///
/// # Errors
///
/// Returns `Cycle` if the recorded dependencies are cyclic.
pub fn reverse_dependency_order<'a>(
    records: &[(&'a ResourceId, &'a AppliedState)],
) -> Result<Vec<usize>, PlanError> {
    let nodes: Vec<_> = records.iter().map(|(id, r)| (*id, &r.depends_on)).collect();
    let mut order = order_nodes(&nodes)?;
    order.reverse();
    Ok(order)
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between the desired graph and applied state.
    ///
    /// # Errors
    ///
    /// Returns a `PlanError` if either the graph or the recorded
    /// dependencies cannot be ordered.
    pub fn compute_diff(
        &self,
        desired: &ResourceGraph,
        current: &StackState,
    ) -> Result<DiffResult, PlanError> {
        let mut result = DiffResult::default();

        for resource in desired.topological_order()? {
            let diff = Self::compute_resource_diff(resource, current.get(&resource.id));
            match diff.diff_type {
                DiffType::Create => result.creates += 1,
                DiffType::Update => result.updates += 1,
                DiffType::NoChange => result.unchanged += 1,
                DiffType::Delete => {}
            }
            result.diffs.push(diff);
        }

        let orphans: Vec<_> = current
            .resources
            .iter()
            .filter(|(id, _)| !desired.contains(id))
            .collect();

        for pos in reverse_dependency_order(&orphans)? {
            let (id, applied) = orphans[pos];
            debug!("{id} is no longer desired");
            result.deletes += 1;
            result.diffs.push(ResourceDiff {
                id: id.clone(),
                diff_type: DiffType::Delete,
                changes: vec![],
                desired: None,
                applied: Some(applied.clone()),
            });
        }

        Ok(result)
    }

    /// Computes the diff for a single desired resource.
    fn compute_resource_diff(resource: &Resource, applied: Option<&AppliedState>) -> ResourceDiff {
        let Some(applied) = applied else {
            debug!("{} needs to be created", resource.id);
            return ResourceDiff {
                id: resource.id.clone(),
                diff_type: DiffType::Create,
                changes: vec![],
                desired: Some(resource.clone()),
                applied: None,
            };
        };

        let changes = compare_attributes(&applied.attributes, &resource.diffable_attributes());
        let diff_type = if changes.is_empty() {
            DiffType::NoChange
        } else {
            debug!("{} needs update ({} fields)", resource.id, changes.len());
            DiffType::Update
        };

        ResourceDiff {
            id: resource.id.clone(),
            diff_type,
            changes,
            desired: Some(resource.clone()),
            applied: Some(applied.clone()),
        }
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for FieldChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| String::from("(none)"), Value::to_string);
        write!(f, "{}: {} -> {}", self.field, show(&self.old), show(&self.new))
    }
}
