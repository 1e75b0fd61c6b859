//! Configuration hashing for change detection.
//!
//! A deterministic hash of the stack options is stamped on every plan and
//! on the state after a run, so a reader can tell which configuration a
//! state file was last applied from.

use sha2::{Digest, Sha256};

use super::spec::DeployConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the desired part of the configuration.
    ///
    /// Only the stack options contribute; state location, provider endpoint
    /// and execution tuning do not change what gets deployed.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let stack = &config.stack;
        let mut hasher = Sha256::new();

        // Length-prefix strings so adjacent fields cannot alias
        for value in [
            stack.project_id.as_str(),
            stack.region.as_str(),
            stack.db_tier.as_str(),
            stack.custom_domain.as_str(),
        ] {
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }

        hasher.update([u8::from(stack.use_custom_image)]);
        hasher.update(stack.min_instances.to_be_bytes());
        hasher.update(stack.max_instances.to_be_bytes());

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
