//! Resource graph module.
//!
//! This module describes the desired resources, their dependency edges,
//! and the deterministic order in which they are reconciled.

mod resource;
mod dependency;
mod stack;

pub use resource::{Attributes, Resource, ResourceId, ResourceKind};
pub use dependency::{ResourceGraph, order_nodes};
pub use stack::{CUSTOM_IMAGE_REPOSITORY, ImageSource, PREBUILT_IMAGE, build_stack_graph, ids};
