// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # runstack
//!
//! A desired-state reconciler for a small serverless application stack:
//! one container service, one managed SQL database, two secrets, and a
//! service account with its role bindings.
//!
//! ## Architecture
//!
//! A run compares the **desired state** (built from `runstack.yaml`) with the
//! **applied state** (recorded by the last successful runs) and converges them:
//!
//! 1. [`graph`] builds the fixed 7-node resource graph and orders it
//! 2. [`planner`] diffs the graph against the state store into a change list,
//!    then applies it one op at a time with retries
//! 3. [`state`] persists what was applied, per resource
//! 4. [`drift`] re-reads live resources and reports divergence
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`graph`]: Resource model and dependency ordering
//! - [`provider`]: Provider client trait and implementations
//! - [`state`]: State storage backend and locking
//! - [`planner`]: Diff computation, change plans and plan execution
//! - [`drift`]: Drift detection against live resources
//! - [`reconciler`]: Run orchestration used by the CLI
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   project_id: acme-prod
//!   region: europe-west1
//!   use_custom_image: true
//!   db_tier: db-g1-small
//!   max_instances: 1
//!
//! provider:
//!   endpoint: https://provision.internal.example.com
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod drift;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig, StackOptions};
pub use drift::{DriftDetector, DriftKind, DriftReport};
pub use error::{Result, RunstackError};
pub use graph::{Resource, ResourceGraph, ResourceId, ResourceKind, build_stack_graph};
pub use planner::{ChangeAction, ChangeOp, ChangePlan, ExecutionResult, PlanExecutor, RetryPolicy};
pub use provider::{HttpProvider, MemoryProvider, ProviderClient};
pub use reconciler::{ApplyReport, DriftCheck, Reconciler};
pub use state::{AppliedState, LocalStateStore, StackState, StateStore};
