//! Provider client contract.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::graph::{Attributes, ResourceKind};

/// Create/read/update/delete access to remote resources.
///
/// Implementations make exactly one attempt per call; retries and backoff
/// belong to the executor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Creates a resource and returns its remote identifier.
    async fn create(
        &self,
        kind: ResourceKind,
        attributes: &Attributes,
    ) -> Result<String, ProviderError>;

    /// Reads the live attributes of a resource.
    ///
    /// Returns `ProviderError::NotFound` if the resource no longer exists.
    async fn read(&self, remote_id: &str) -> Result<Attributes, ProviderError>;

    /// Replaces the attributes of an existing resource.
    async fn update(&self, remote_id: &str, attributes: &Attributes) -> Result<(), ProviderError>;

    /// Deletes a resource.
    async fn delete(&self, remote_id: &str) -> Result<(), ProviderError>;

    /// Short name of the implementation, used in logs.
    fn name(&self) -> &'static str;
}
