//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, DeployConfig, ValidationResult};
use crate::drift::DriftReport;
use crate::planner::{ChangeAction, ChangePlan, FieldChange, OpStatus, PlanSummary};
use crate::reconciler::{ApplyReport, DriftCheck};
use crate::state::StackState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan op row for table display.
#[derive(Tabled)]
struct PlanOpRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Op outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Retries")]
    retries: u32,
    #[tabled(rename = "Phase")]
    phase: String,
}

/// Applied resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Applied")]
    applied_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a change plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ChangePlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ChangePlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes. {} resources are up to date.\n",
                "✓".green(),
                plan.unchanged.len()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nChange plan ({})", plan.operation);
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            ConfigHasher::short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanOpRow> = plan
            .ops
            .iter()
            .enumerate()
            .map(|(i, op)| PlanOpRow {
                index: i + 1,
                action: Self::format_action(op.action),
                resource: op.id.to_string(),
                reason: Self::truncate(&op.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for op in plan.ops.iter().filter(|op| !op.changes.is_empty()) {
                let _ = write!(output, "\n{} {}\n", "~".yellow(), op.id);
                for change in &op.changes {
                    let _ = writeln!(output, "     {change}");
                }
            }
            if !plan.unchanged.is_empty() {
                let _ = writeln!(output, "\nUnchanged:");
                for id in &plan.unchanged {
                    let _ = writeln!(output, "   {} {id}", "=".dimmed());
                }
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.delete.to_string().red(),
            summary.unchanged
        );

        output
    }

    /// Formats the result of an apply, destroy or rollback run.
    #[must_use]
    pub fn format_execution(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ExecutionJson::from(report)),
            OutputFormat::Text => Self::format_execution_text(report),
        }
    }

    /// Formats a run result as text.
    fn format_execution_text(report: &ApplyReport) -> String {
        let execution = &report.execution;
        if execution.outcomes.is_empty() {
            return format!("{} Nothing to do.\n", "✓".green());
        }

        let rows: Vec<OutcomeRow> = execution
            .outcomes
            .iter()
            .map(|o| OutcomeRow {
                index: o.index + 1,
                action: Self::format_action(o.op.action),
                resource: o.op.id.to_string(),
                status: Self::format_status(&o.status),
                retries: o.retries,
                phase: o.phase.to_string(),
            })
            .collect();

        let mut output = String::new();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let headline = if execution.success() {
            format!("{} {} complete", "✓".green(), report.plan.operation)
        } else {
            format!("{} {} halted", "✗".red(), report.plan.operation)
        };
        let _ = write!(
            output,
            "\n{headline}: {} applied, {} failed, {} not attempted in {:.1}s\n",
            execution.applied(),
            execution.failed(),
            execution.not_attempted(),
            execution.elapsed.as_secs_f64()
        );

        if let Some(err) = &execution.halted {
            let _ = writeln!(output, "   {} {err}", "Error:".red());
            let _ = writeln!(
                output,
                "   Applied changes were kept. Re-run to resume, or use --rollback-on-failure."
            );
        }

        output
    }

    /// Formats a drift check.
    #[must_use]
    pub fn format_drift(&self, check: &DriftCheck) -> String {
        match self.format {
            OutputFormat::Json => to_json(&DriftJson::from(check)),
            OutputFormat::Text => {
                if check.is_converged() {
                    return format!(
                        "{} No drift detected across {} resources.\n",
                        "✓".green(),
                        check.checked
                    );
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for report in &check.reports {
                    let _ = writeln!(output, "   - {report}");
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted.\n",
                    check.reports.len(),
                    check.checked
                );
                output
            }
        }
    }

    /// Formats the applied state.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}\n\n", state.project_id);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.len());

                if !state.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .iter()
                        .map(|(id, applied)| ResourceRow {
                            resource: id.to_string(),
                            remote_id: Self::truncate(&applied.remote_id, 40),
                            applied_at: applied.applied_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} resources)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.len()
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(&self, config: &DeployConfig, result: &ValidationResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.is_valid(),
                errors: result.errors.iter().map(ToString::to_string).collect(),
                warnings: &result.warnings,
                project_id: &config.stack.project_id,
                region: &config.stack.region,
            }),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid.\n", "✓".green());
                for warning in &result.warnings {
                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                }

                let stack = &config.stack;
                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "   Project: {}", stack.project_id);
                let _ = writeln!(output, "   Region: {}", stack.region);
                let _ = writeln!(
                    output,
                    "   Image: {}",
                    if stack.use_custom_image { "custom" } else { "prebuilt" }
                );
                let _ = writeln!(output, "   Database tier: {}", stack.db_tier);
                let _ = writeln!(
                    output,
                    "   Instances: {}..{}",
                    stack.min_instances, stack.max_instances
                );
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: ChangeAction) -> String {
        match action {
            ChangeAction::Create => "+create".green().to_string(),
            ChangeAction::Update => "~update".yellow().to_string(),
            ChangeAction::Delete => "-delete".red().to_string(),
            ChangeAction::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Formats an op status with color.
    fn format_status(status: &OpStatus) -> String {
        match status {
            OpStatus::Applied => "applied".green().to_string(),
            OpStatus::Failed { .. } => "failed".red().to_string(),
            OpStatus::NotAttempted => "not attempted".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson<'a> {
    config_hash: &'a str,
    operation: String,
    summary: PlanSummary,
    ops: Vec<OpJson<'a>>,
    unchanged: Vec<String>,
}

#[derive(Serialize)]
struct OpJson<'a> {
    action: String,
    resource: String,
    reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_id: Option<&'a str>,
    changes: &'a [FieldChange],
}

impl<'a> From<&'a ChangePlan> for PlanJson<'a> {
    fn from(plan: &'a ChangePlan) -> Self {
        Self {
            config_hash: &plan.config_hash,
            operation: plan.operation.to_string(),
            summary: plan.summary(),
            ops: plan
                .ops
                .iter()
                .map(|op| OpJson {
                    action: op.action.to_string(),
                    resource: op.id.to_string(),
                    reason: &op.reason,
                    remote_id: op.remote_id.as_deref(),
                    changes: &op.changes,
                })
                .collect(),
            unchanged: plan.unchanged.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Serialize)]
struct ExecutionJson {
    operation: String,
    success: bool,
    applied: usize,
    failed: usize,
    not_attempted: usize,
    elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    ops: Vec<OutcomeJson>,
}

#[derive(Serialize)]
struct OutcomeJson {
    action: String,
    resource: String,
    status: String,
    retries: u32,
    phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&ApplyReport> for ExecutionJson {
    fn from(report: &ApplyReport) -> Self {
        let execution = &report.execution;
        Self {
            operation: report.plan.operation.to_string(),
            success: execution.success(),
            applied: execution.applied(),
            failed: execution.failed(),
            not_attempted: execution.not_attempted(),
            elapsed_secs: execution.elapsed.as_secs_f64(),
            error: execution.halted.as_ref().map(ToString::to_string),
            ops: execution
                .outcomes
                .iter()
                .map(|o| OutcomeJson {
                    action: o.op.action.to_string(),
                    resource: o.op.id.to_string(),
                    status: o.status.to_string(),
                    retries: o.retries,
                    phase: o.phase.to_string(),
                    remote_id: o.remote_id.clone(),
                    error: match &o.status {
                        OpStatus::Failed { error } => Some(error.to_string()),
                        _ => None,
                    },
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct DriftJson<'a> {
    checked: usize,
    drifted: usize,
    reports: &'a [DriftReport],
}

impl<'a> From<&'a DriftCheck> for DriftJson<'a> {
    fn from(check: &'a DriftCheck) -> Self {
        Self {
            checked: check.checked,
            drifted: check.reports.len(),
            reports: &check.reports,
        }
    }
}

#[derive(Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    errors: Vec<String>,
    warnings: &'a [String],
    project_id: &'a str,
    region: &'a str,
}
