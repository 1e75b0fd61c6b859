//! In-memory provider.
//!
//! Used as a sandbox in tests. Faults can be queued per resource, and live
//! resources can be tampered with or removed behind the reconciler's back
//! to simulate drift.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::error::ProviderError;
use crate::graph::{Attributes, ResourceId, ResourceKind};

use super::client::ProviderClient;

/// Live keys an update leaves in place when the request omits them: the
/// provider-computed link and write-once secret material.
const RETAINED_ON_UPDATE: [&str; 2] = ["self_link", "value"];

/// A provider call as recorded by [`MemoryProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `create` for the given resource (`kind/name`).
    Create(String),
    /// `read` of a remote id.
    Read(String),
    /// `update` of a remote id.
    Update(String),
    /// `delete` of a remote id.
    Delete(String),
}

#[derive(Debug, Default)]
struct Inner {
    /// Live resources by remote id.
    resources: BTreeMap<String, Attributes>,
    /// Queued faults by resource key (`kind/name`).
    faults: HashMap<String, VecDeque<ProviderError>>,
    /// Every call, in order.
    calls: Vec<ProviderCall>,
    /// Remote id sequence.
    next_seq: u64,
}

/// Provider that keeps resources in process memory.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues errors returned by the next calls touching `id`, one per call.
    pub fn inject(&self, id: &ResourceId, errors: Vec<ProviderError>) {
        self.lock()
            .faults
            .entry(id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Overwrites one live attribute of a resource.
    ///
    /// Returns false if the resource does not exist.
    pub fn tamper(&self, remote_id: &str, key: &str, value: Value) -> bool {
        let mut inner = self.lock();
        inner.resources.get_mut(remote_id).is_some_and(|attrs| {
            attrs.insert(key.to_string(), value);
            true
        })
    }

    /// Removes a resource without going through `delete`.
    pub fn forget(&self, remote_id: &str) -> bool {
        self.lock().resources.remove(remote_id).is_some()
    }

    /// Returns the live attributes of a resource.
    #[must_use]
    pub fn get(&self, remote_id: &str) -> Option<Attributes> {
        self.lock().resources.get(remote_id).cloned()
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    /// Returns true if no resources exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns how many `create` calls were made.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ProviderCall::Create(_)))
            .count()
    }

    /// Resource key (`kind/name`) of a remote id minted by this provider.
    fn key_of(remote_id: &str) -> &str {
        remote_id.split_once('#').map_or(remote_id, |(key, _)| key)
    }

    /// Pops the next queued fault for a resource key.
    fn take_fault(inner: &mut Inner, key: &str) -> Option<ProviderError> {
        let fault = inner.faults.get_mut(key).and_then(VecDeque::pop_front);
        if let Some(err) = &fault {
            debug!("Injected fault for {key}: {err}");
        }
        fault
    }
}

#[async_trait]
impl ProviderClient for MemoryProvider {
    async fn create(
        &self,
        kind: ResourceKind,
        attributes: &Attributes,
    ) -> Result<String, ProviderError> {
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::validation("attribute 'name' is required"))?;
        let key = ResourceId::new(kind, name).to_string();

        let mut inner = self.lock();
        inner.calls.push(ProviderCall::Create(key.clone()));
        if let Some(err) = Self::take_fault(&mut inner, &key) {
            return Err(err);
        }

        if inner.resources.keys().any(|id| Self::key_of(id) == key) {
            return Err(ProviderError::Conflict {
                message: format!("{key} already exists"),
            });
        }

        inner.next_seq += 1;
        let remote_id = format!("{key}#{}", inner.next_seq);
        let mut live = attributes.clone();
        live.insert(
            String::from("self_link"),
            Value::String(format!("memory://{remote_id}")),
        );
        inner.resources.insert(remote_id.clone(), live);

        trace!("Created {remote_id}");
        Ok(remote_id)
    }

    async fn read(&self, remote_id: &str) -> Result<Attributes, ProviderError> {
        let mut inner = self.lock();
        inner.calls.push(ProviderCall::Read(remote_id.to_string()));
        if let Some(err) = Self::take_fault(&mut inner, Self::key_of(remote_id)) {
            return Err(err);
        }

        inner
            .resources
            .get(remote_id)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(remote_id))
    }

    async fn update(&self, remote_id: &str, attributes: &Attributes) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.calls.push(ProviderCall::Update(remote_id.to_string()));
        if let Some(err) = Self::take_fault(&mut inner, Self::key_of(remote_id)) {
            return Err(err);
        }

        let live = inner
            .resources
            .get_mut(remote_id)
            .ok_or_else(|| ProviderError::not_found(remote_id))?;
        let mut updated = attributes.clone();
        for key in RETAINED_ON_UPDATE {
            if !updated.contains_key(key) {
                if let Some(value) = live.remove(key) {
                    updated.insert(key.to_string(), value);
                }
            }
        }
        *live = updated;

        trace!("Updated {remote_id}");
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.calls.push(ProviderCall::Delete(remote_id.to_string()));
        if let Some(err) = Self::take_fault(&mut inner, Self::key_of(remote_id)) {
            return Err(err);
        }

        if inner.resources.remove(remote_id).is_none() {
            return Err(ProviderError::not_found(remote_id));
        }

        trace!("Deleted {remote_id}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
