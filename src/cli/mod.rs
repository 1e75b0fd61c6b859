//! CLI module for the runstack reconciler.
//!
//! This module provides the command-line interface for planning, applying
//! and inspecting the stack.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
