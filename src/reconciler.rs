//! Reconciler for converging the stack to its desired state.
//!
//! This module wires configuration, the resource graph, the state store, the
//! planner, the executor and the drift detector together. Mutating runs hold
//! the state lock and always persist the state they produced, including after
//! a halted run.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, DeployConfig};
use crate::drift::{DriftDetector, DriftReport};
use crate::error::{PlanError, ReconcileError, Result};
use crate::graph::{ResourceGraph, build_stack_graph};
use crate::planner::{ChangePlan, ExecutionResult, PlanExecutor, RetryPolicy, plan, plan_destroy};
use crate::provider::ProviderClient;
use crate::state::{StackState, StateStore, generate_holder_id};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a, S: StateStore> {
    /// Configuration.
    config: &'a DeployConfig,
    /// State store.
    state_store: &'a S,
    /// Provider client.
    provider: &'a dyn ProviderClient,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Backoff for transient provider errors.
    retry: RetryPolicy,
    /// Wall-clock budget per run.
    run_timeout: Duration,
}

/// Result of an apply, destroy or rollback run.
#[derive(Debug)]
pub struct ApplyReport {
    /// The plan that was executed.
    pub plan: ChangePlan,
    /// What happened to each op.
    pub execution: ExecutionResult,
    /// State before the run, used to build a rollback plan.
    pub previous_state: StackState,
}

/// Result of a drift check.
#[derive(Debug)]
pub struct DriftCheck {
    /// Number of recorded resources that were read.
    pub checked: usize,
    /// Drifted resources.
    pub reports: Vec<DriftReport>,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler using the execution settings from `config`.
    #[must_use]
    pub fn new(
        config: &'a DeployConfig,
        state_store: &'a S,
        provider: &'a dyn ProviderClient,
    ) -> Self {
        Self {
            config,
            state_store,
            provider,
            hasher: ConfigHasher::new(),
            retry: RetryPolicy::from_config(&config.execution),
            run_timeout: Duration::from_secs(config.execution.run_timeout_secs),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the run timeout.
    #[must_use]
    pub const fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Builds the desired resource graph from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be built.
    pub fn desired_graph(&self) -> Result<ResourceGraph> {
        Ok(build_stack_graph(&self.config.stack)?)
    }

    /// Loads the applied state, or an empty one on the first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or belongs to another
    /// project.
    pub async fn load_state(&self) -> Result<StackState> {
        let project_id = &self.config.stack.project_id;
        match self.state_store.load().await? {
            Some(state) => {
                state.check_compatible(project_id)?;
                debug!("Loaded state with {} resources", state.len());
                Ok(state)
            }
            None => {
                debug!("No state found, starting from scratch");
                Ok(StackState::new(project_id))
            }
        }
    }

    /// Computes the change plan without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or the graph cannot be
    /// ordered.
    pub async fn plan(&self) -> Result<ChangePlan> {
        let state = self.load_state().await?;
        let graph = self.desired_graph()?;
        let config_hash = self.hasher.hash_config(self.config);

        let plan = plan(&graph, &state, &config_hash)?;
        let summary = plan.summary();
        info!(
            "Plan: {} to create, {} to update, {} to delete, {} unchanged",
            summary.create, summary.update, summary.delete, summary.unchanged
        );
        Ok(plan)
    }

    /// Converges remote resources to the desired state.
    ///
    /// A halted run is not an error: the report carries the failure and the
    /// state keeps everything that was applied before it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, planning fails, or
    /// the state cannot be loaded.
    pub async fn apply(&self) -> Result<ApplyReport> {
        info!("Applying stack for project {}", self.config.stack.project_id);
        let graph = self.desired_graph()?;
        let config_hash = self.hasher.hash_config(self.config);

        self.locked(|state| plan(&graph, state, &config_hash).map_err(Into::into))
            .await
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, the recorded
    /// dependencies are cyclic, or the state cannot be loaded.
    pub async fn destroy(&self) -> Result<ApplyReport> {
        warn!("Destroying stack for project {}", self.config.stack.project_id);
        let config_hash = self.hasher.hash_config(self.config);

        self.locked(|state| plan_destroy(state, &config_hash).map_err(Into::into))
            .await
    }

    /// Undoes the ops a previous run applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the state cannot
    /// be loaded.
    pub async fn rollback(&self, report: &ApplyReport) -> Result<ApplyReport> {
        warn!("Rolling back {} applied ops", report.execution.applied());
        self.locked(|_| Ok(ChangePlan::rollback(&report.execution, &report.previous_state)))
            .await
    }

    /// Applies a plan that was shown to the user.
    ///
    /// The plan is recomputed under the lock and must match `previewed`
    /// op for op, so nothing runs that was not confirmed.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::StateChanged` if another run changed the state
    /// since `previewed` was computed, or an error if the lock cannot be
    /// acquired.
    pub async fn apply_previewed(&self, previewed: &ChangePlan) -> Result<ApplyReport> {
        let graph = self.desired_graph()?;

        self.locked(|state| {
            let current = plan(&graph, state, &previewed.config_hash)?;
            if current.ops != previewed.ops {
                return Err(PlanError::StateChanged {
                    previewed: previewed.ops.len(),
                    current: current.ops.len(),
                }
                .into());
            }
            Ok(current)
        })
        .await
    }

    /// Reads live resources and reports drift from the applied state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or a live read fails
    /// with anything but not-found.
    pub async fn check_drift(&self) -> Result<DriftCheck> {
        info!("Checking drift for project {}", self.config.stack.project_id);
        let state = self.load_state().await?;
        let reports = DriftDetector::new(self.provider).detect(&state).await?;

        Ok(DriftCheck {
            checked: state.len(),
            reports,
        })
    }

    /// Runs the plan built by `make_plan` under the state lock.
    async fn locked<F>(&self, make_plan: F) -> Result<ApplyReport>
    where
        F: FnOnce(&StackState) -> Result<ChangePlan> + Send,
    {
        let lock = self.state_store.acquire_lock(&generate_holder_id()).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let result = self.run_plan(make_plan).await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    /// Executes the plan, saving state after every committed op and once
    /// more at the end. A failed save halts the run but keeps the report.
    async fn run_plan<F>(&self, make_plan: F) -> Result<ApplyReport>
    where
        F: FnOnce(&StackState) -> Result<ChangePlan> + Send,
    {
        let mut state = self.load_state().await?;
        let previous_state = state.clone();
        let plan = make_plan(&state)?;

        let executor = PlanExecutor::new(self.provider)
            .with_retry_policy(self.retry.clone())
            .with_run_timeout(self.run_timeout)
            .with_checkpoint(self.state_store);
        let mut execution = executor.execute(&plan, &mut state).await;

        if let Err(e) = self.state_store.save(&state).await {
            error!("Failed to save state after the run: {e}");
            if execution.halted.is_none() {
                execution.halted = Some(ReconcileError::StateNotSaved {
                    after: String::from("the run"),
                    message: e.to_string(),
                });
            }
        }
        if let Some(err) = &execution.halted {
            error!("Run halted: {err}");
        }

        Ok(ApplyReport {
            plan,
            execution,
            previous_state,
        })
    }
}

impl ApplyReport {
    /// Returns true if every op was applied.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.execution.success()
    }
}

impl DriftCheck {
    /// Returns true if nothing drifted.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.reports.is_empty()
    }
}

impl std::fmt::Display for DriftCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reports.is_empty() {
            return write!(f, "No drift detected across {} resources", self.checked);
        }

        write!(f, "Drift detected on {} of {} resources:", self.reports.len(), self.checked)?;
        for report in &self.reports {
            write!(f, "\n  - {report}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::error::{ProviderError, RunstackError, StateError};
    use crate::graph::ids;
    use crate::planner::ChangeAction;
    use crate::provider::MemoryProvider;
    use crate::state::{LocalStateStore, LockInfo};
    use tempfile::TempDir;

    fn config(stack: StackOptions) -> DeployConfig {
        let mut config = DeployConfig::from_stack(stack);
        config.execution.backoff_base_ms = 1;
        config
    }

    fn default_config() -> DeployConfig {
        config(StackOptions::new("acme-prod", "us-central1"))
    }

    /// Local store whose saves always fail.
    struct ReadOnlyStore(LocalStateStore);

    #[async_trait::async_trait]
    impl StateStore for ReadOnlyStore {
        async fn load(&self) -> Result<Option<StackState>> {
            self.0.load().await
        }

        async fn save(&self, _state: &StackState) -> Result<()> {
            Err(StateError::write("disk full").into())
        }

        async fn delete(&self) -> Result<()> {
            self.0.delete().await
        }

        async fn exists(&self) -> Result<bool> {
            self.0.exists().await
        }

        async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
            self.0.acquire_lock(holder).await
        }

        async fn release_lock(&self, lock_id: &str) -> Result<()> {
            self.0.release_lock(lock_id).await
        }

        async fn force_unlock(&self) -> Result<Option<LockInfo>> {
            self.0.force_unlock().await
        }

        async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
            self.0.get_lock_info().await
        }

        fn backend_type(&self) -> &'static str {
            "read-only"
        }
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        let first = reconciler.apply().await.expect("apply");
        assert!(first.success());
        assert_eq!(first.plan.count(ChangeAction::Create), 7);

        let plan = reconciler.plan().await.expect("plan");
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged.len(), 7);

        let second = reconciler.apply().await.expect("apply");
        assert!(second.plan.is_empty());
        assert_eq!(provider.create_count(), 7);

        let saved = store.load().await.expect("load").expect("state");
        assert_eq!(saved.len(), 7);
        assert_eq!(saved.history.len(), 2);
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_halted_apply_saves_state_and_resumes() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        provider.inject(&ids::database(), vec![ProviderError::validation("tier not offered")]);
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        let halted = reconciler.apply().await.expect("apply");
        assert!(!halted.success());
        assert_eq!(halted.execution.applied(), 3);

        let saved = store.load().await.expect("load").expect("state");
        assert_eq!(saved.len(), 3);
        assert!(!saved.history.last().expect("history").success);

        let resumed = reconciler.apply().await.expect("apply");
        assert!(resumed.success());
        assert_eq!(resumed.plan.ops.len(), 4);
        assert_eq!(resumed.plan.ops[0].id, ids::database());
    }

    #[tokio::test]
    async fn test_custom_image_toggle_updates_service_only() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();

        let prebuilt = default_config();
        Reconciler::new(&prebuilt, &store, &provider)
            .apply()
            .await
            .expect("apply");

        let mut stack = StackOptions::new("acme-prod", "us-central1");
        stack.use_custom_image = true;
        let custom = config(stack);
        let report = Reconciler::new(&custom, &store, &provider)
            .apply()
            .await
            .expect("apply");

        assert_eq!(report.plan.ops.len(), 1);
        assert_eq!(report.plan.ops[0].action, ChangeAction::Update);
        assert_eq!(report.plan.ops[0].id, ids::compute_service());
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        reconciler.apply().await.expect("apply");
        let report = reconciler.destroy().await.expect("destroy");

        assert!(report.success());
        assert_eq!(report.plan.ops.len(), 7);
        assert_eq!(report.plan.ops[0].id, ids::compute_service());
        assert!(provider.is_empty());

        let saved = store.load().await.expect("load").expect("state");
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_after_halt() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::compute_service(),
            vec![ProviderError::permission_denied("run.services.create")],
        );
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        let halted = reconciler.apply().await.expect("apply");
        assert_eq!(halted.execution.applied(), 6);

        let undone = reconciler.rollback(&halted).await.expect("rollback");
        assert!(undone.success());
        assert!(provider.is_empty());
        assert!(store.load().await.expect("load").expect("state").is_empty());
    }

    #[tokio::test]
    async fn test_drift_check() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        reconciler.apply().await.expect("apply");
        let clean = reconciler.check_drift().await.expect("drift");
        assert!(clean.is_converged());
        assert_eq!(clean.checked, 7);

        let state = store.load().await.expect("load").expect("state");
        let key = state.get(&ids::encryption_key()).expect("key").remote_id.clone();
        assert!(provider.forget(&key));

        let drifted = reconciler.check_drift().await.expect("drift");
        assert_eq!(drifted.reports.len(), 1);
        assert!(drifted.to_string().contains("secret/encryption-key"));
    }

    #[tokio::test]
    async fn test_state_from_other_project_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        store
            .save(&StackState::new("someone-else"))
            .await
            .expect("save");
        let provider = MemoryProvider::new();
        let config = default_config();

        let err = Reconciler::new(&config, &store, &provider)
            .plan()
            .await
            .expect_err("project mismatch");
        assert!(matches!(
            err,
            RunstackError::State(StateError::ProjectMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_fails_while_locked() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        store.acquire_lock("other-host").await.expect("lock");
        let provider = MemoryProvider::new();
        let config = default_config();

        let err = Reconciler::new(&config, &store, &provider)
            .apply()
            .await
            .expect_err("locked");
        assert!(matches!(
            err,
            RunstackError::State(StateError::LockedByOther { .. })
        ));
        assert_eq!(provider.create_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_save_still_returns_report() {
        let dir = TempDir::new().expect("tempdir");
        let store = ReadOnlyStore(LocalStateStore::with_base_dir(dir.path()));
        let provider = MemoryProvider::new();
        let config = default_config();

        let report = Reconciler::new(&config, &store, &provider)
            .apply()
            .await
            .expect("report despite failed save");

        assert!(!report.success());
        match &report.execution.halted {
            Some(ReconcileError::StateNotSaved { after, message }) => {
                assert_eq!(after, "service-account/app-runtime");
                assert!(message.contains("disk full"));
            }
            other => panic!("expected a state save failure, got {other:?}"),
        }
        assert_eq!(report.execution.applied(), 1);
        assert_eq!(report.execution.not_attempted(), 6);
        assert_eq!(provider.create_count(), 1);
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_previewed_plan_is_applied() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        let previewed = reconciler.plan().await.expect("plan");
        let report = reconciler.apply_previewed(&previewed).await.expect("apply");

        assert!(report.success());
        assert_eq!(report.plan.ops, previewed.ops);
        assert_eq!(store.load().await.expect("load").expect("state").len(), 7);
    }

    #[tokio::test]
    async fn test_previewed_plan_rejected_after_concurrent_apply() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        let config = default_config();
        let reconciler = Reconciler::new(&config, &store, &provider);

        let previewed = reconciler.plan().await.expect("plan");
        reconciler.apply().await.expect("other run");

        let err = reconciler
            .apply_previewed(&previewed)
            .await
            .expect_err("state changed");
        assert!(matches!(
            err,
            RunstackError::Plan(PlanError::StateChanged {
                previewed: 7,
                current: 0
            })
        ));
        assert!(err.to_string().contains("run plan again"));
        assert_eq!(provider.create_count(), 7);
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }
}
