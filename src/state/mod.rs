//! State management module for runstack.
//!
//! This module provides persistent storage of the last-applied configuration
//! of every managed resource, plus the lock that serializes mutating runs.

mod store;
mod local;
mod lock;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use types::{
    AppliedState, MAX_HISTORY, RunHistoryEntry, RunOperation, STATE_VERSION, StackState,
};
