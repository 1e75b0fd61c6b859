//! Local file-based state storage backend.
//!
//! The state document is a single JSON file. Writes go to a temporary file
//! that is then renamed over the target, so a crash never leaves a torn file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, RunstackError, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::StackState;

/// Default state directory name.
pub const STATE_DIR: &str = ".runstack";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Directory holding the state and lock files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store under `base_dir` with the default file names.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates a store for an explicit state file path.
    ///
    /// The lock file lives next to the state file.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Writes `content` to `path` via `temp_path` and a rename.
    async fn write_atomic(
        path: &Path,
        temp_path: &Path,
        content: &str,
    ) -> std::result::Result<(), String> {
        let mut file = fs::File::create(temp_path)
            .await
            .map_err(|e| format!("Failed to create {}: {e}", temp_path.display()))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| format!("Failed to write {}: {e}", temp_path.display()))?;
        file.sync_all()
            .await
            .map_err(|e| format!("Failed to sync {}: {e}", temp_path.display()))?;

        fs::rename(temp_path, path)
            .await
            .map_err(|e| format!("Failed to rename {}: {e}", temp_path.display()))
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            RunstackError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            RunstackError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing with `AlreadyExists` if any lock is present.
    async fn create_lock_file(&self, content: &str) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await
    }

    /// Replaces an expired lock with `lock_info`.
    ///
    /// The replacement is a single rename from a temporary file unique to
    /// the new lock; reading it back tells which racer won.
    async fn take_over_lock(&self, lock_info: &LockInfo, content: &str) -> Result<()> {
        let temp_path = self
            .base_dir
            .join(format!("{LOCK_FILE}.{}.tmp", lock_info.lock_id));
        Self::write_atomic(&self.lock_path, &temp_path, content)
            .await
            .map_err(|message| StateError::LockFailed { message })?;

        match self.read_lock_file().await? {
            Some(current) if current.lock_id == lock_info.lock_id => Ok(()),
            Some(current) => Err(locked_by(&current)),
            None => Err(StateError::LockFailed {
                message: String::from("Lock file vanished during takeover"),
            }
            .into()),
        }
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                RunstackError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            RunstackError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let state: StackState = serde_json::from_str(&content).map_err(|e| {
            RunstackError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("tmp");
        Self::write_atomic(&self.state_path, &temp_path, &content)
            .await
            .map_err(StateError::write)?;

        info!(
            "Saved state ({} resources) to {}",
            state.len(),
            self.state_path.display()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::write(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        match self.create_lock_file(&content).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let Some(existing) = self.read_lock_file().await? else {
                    return Err(StateError::LockFailed {
                        message: String::from("Lock was released while acquiring, retry"),
                    }
                    .into());
                };
                if !existing.is_expired() {
                    return Err(locked_by(&existing));
                }
                warn!("Taking over expired lock held by {}", existing.holder);
                self.take_over_lock(&lock_info, &content).await?;
            }
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create {}: {e}", self.lock_path.display()),
                }
                .into());
            }
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                debug!("Released state lock: {lock_id}");
            } else {
                warn!(
                    "Not releasing lock {}: held under id {}",
                    lock_id, existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await?;
        if let Some(lock) = &existing {
            warn!("Force-removing state lock held by {}", lock.holder);
            self.delete_lock_file().await?;
        }
        Ok(existing)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Error for a live lock held by someone else.
fn locked_by(lock: &LockInfo) -> RunstackError {
    StateError::LockedByOther {
        holder: lock.holder.clone(),
        since: lock.acquired_at.to_rfc3339(),
        expires_in_secs: lock.remaining_secs(),
    }
    .into()
}
