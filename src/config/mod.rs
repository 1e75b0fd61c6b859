//! Configuration module for the runstack reconciler.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `runstack.yaml`
//! - Environment and command-line overrides
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    DEFAULT_DB_TIER, DeployConfig, ExecutionConfig, ProviderConfig, StackOptions, StateConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
