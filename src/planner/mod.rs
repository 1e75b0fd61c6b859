//! Planning module for reconciliation runs.
//!
//! This module compares the desired graph with the applied state, turns the
//! difference into an ordered change plan, and executes that plan against a
//! provider.

mod diff;
mod executor;
mod lifecycle;
mod plan;
mod retry;

pub use diff::{
    DiffEngine, DiffResult, DiffType, FieldChange, ResourceDiff, compare_attributes,
    compare_recorded,
};
pub use executor::{ExecutionResult, OpOutcome, OpStatus, PlanExecutor};
pub use lifecycle::ResourcePhase;
pub use plan::{ChangeAction, ChangeOp, ChangePlan, PlanSummary, plan, plan_destroy};
pub use retry::RetryPolicy;
