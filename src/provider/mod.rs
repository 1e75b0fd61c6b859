//! Provider module.
//!
//! The [`ProviderClient`] trait is the only seam between the reconciler and
//! the cloud: everything above it is provider-agnostic.

mod client;
mod http;
mod memory;

pub use client::ProviderClient;
#[cfg(test)]
pub use client::MockProviderClient;
pub use http::HttpProvider;
pub use memory::{MemoryProvider, ProviderCall};
