//! Plan executor for applying change plans.
//!
//! Ops run strictly in order, one at a time. A transient provider error is
//! retried with backoff; any other failure halts the run, leaving the ops
//! after it unattempted. State is updated only after a confirmed success, so
//! a halted run keeps everything it committed.

use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ProviderError, ReconcileError};
use crate::graph::{Resource, ResourceId};
use crate::provider::ProviderClient;
use crate::state::{AppliedState, RunHistoryEntry, RunOperation, StackState, StateStore};

use super::lifecycle::ResourcePhase;
use super::plan::{ChangeAction, ChangeOp, ChangePlan};
use super::retry::RetryPolicy;

/// Executor for change plans.
pub struct PlanExecutor<'a> {
    /// Provider client.
    provider: &'a dyn ProviderClient,
    /// Backoff for transient errors.
    retry: RetryPolicy,
    /// Wall-clock budget for the whole run.
    run_timeout: Option<Duration>,
    /// Store that receives the state after every committed op.
    checkpoint: Option<&'a dyn StateStore>,
}

/// How an op ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStatus {
    /// The provider confirmed the change and state was updated.
    Applied,
    /// The op failed and halted the run.
    Failed {
        /// Why.
        error: ReconcileError,
    },
    /// The run halted before reaching the op.
    NotAttempted,
}

/// Result of a single op.
#[derive(Debug, Clone)]
pub struct OpOutcome {
    /// Position of the op in the plan.
    pub index: usize,
    /// The op.
    pub op: ChangeOp,
    /// How it ended.
    pub status: OpStatus,
    /// Retries made after the first attempt.
    pub retries: u32,
    /// Lifecycle phase the resource was left in.
    pub phase: ResourcePhase,
    /// Remote identifier of the resource, if known.
    pub remote_id: Option<String>,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// One outcome per op, in plan order.
    pub outcomes: Vec<OpOutcome>,
    /// Error that halted the run, if any.
    pub halted: Option<ReconcileError>,
    /// Wall-clock time spent.
    pub elapsed: Duration,
}

/// Provider call an op maps to, with its inputs resolved.
enum Call<'o> {
    Create(&'o Resource),
    Update(&'o str, &'o Resource),
    Delete(&'o str),
}

impl std::fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("run_timeout", &self.run_timeout)
            .field("checkpoint", &self.checkpoint.map(|store| store.backend_type()))
            .finish()
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates an executor with the default retry policy and no run timeout.
    #[must_use]
    pub fn new(provider: &'a dyn ProviderClient) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            run_timeout: None,
            checkpoint: None,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the wall-clock budget for a run.
    #[must_use]
    pub const fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = Some(run_timeout);
        self
    }

    /// Saves the state to `store` after every committed op.
    ///
    /// A failed save halts the run like a failed op.
    #[must_use]
    pub const fn with_checkpoint(mut self, store: &'a dyn StateStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Executes a plan against `state`.
    ///
    /// Never rolls back: on failure the result lists applied, failed and
    /// not-attempted ops, and `state` holds every committed change.
    pub async fn execute(&self, plan: &ChangePlan, state: &mut StackState) -> ExecutionResult {
        let started = Instant::now();
        info!(
            "Executing {} plan with {} ops via {} provider",
            plan.operation,
            plan.ops.len(),
            self.provider.name()
        );

        let mut outcomes = Vec::with_capacity(plan.ops.len());
        let mut halted: Option<ReconcileError> = None;

        for (index, op) in plan.ops.iter().enumerate() {
            if halted.is_some() {
                outcomes.push(OpOutcome::new(index, op, resting_phase(state, op)));
                continue;
            }

            let outcome = self.execute_op(index, op, state, started).await;
            match &outcome.status {
                OpStatus::Failed { error } => {
                    error!("Op {} halted the run: {error}", index + 1);
                    halted = Some(error.clone());
                }
                OpStatus::Applied if op.action != ChangeAction::NoOp => {
                    if let Err(error) = self.save_checkpoint(state, &op.id).await {
                        error!("Op {} applied but not persisted: {error}", index + 1);
                        halted = Some(error);
                    }
                }
                _ => {}
            }
            outcomes.push(outcome);
        }

        let result = ExecutionResult {
            outcomes,
            halted,
            elapsed: started.elapsed(),
        };

        state.add_history(RunHistoryEntry::new(
            plan.operation,
            &plan.config_hash,
            plan.resource_ids(),
            result.halted.as_ref().map(ToString::to_string),
        ));
        if result.success() && plan.operation == RunOperation::Apply {
            state.config_hash.clone_from(&plan.config_hash);
        }

        info!("{result}");
        result
    }

    /// Executes a single op, retrying transient errors.
    async fn execute_op(
        &self,
        index: usize,
        op: &ChangeOp,
        state: &mut StackState,
        started: Instant,
    ) -> OpOutcome {
        let mut outcome = OpOutcome::new(index, op, resting_phase(state, op));

        let Some(pending) = ResourcePhase::pending_for(op.action) else {
            outcome.status = OpStatus::Applied;
            return outcome;
        };

        if let Err(error) = self.check_budget(op, started, Duration::ZERO) {
            return outcome.failed(error);
        }

        let call = match resolve_call(op) {
            Ok(call) => call,
            Err(error) => return outcome.failed(error),
        };

        match outcome.phase.transition(pending, &op.id) {
            Ok(phase) => outcome.phase = phase,
            Err(error) => return outcome.failed(error),
        }

        info!("[{}] {}", index + 1, op.description());

        loop {
            match self.attempt(&call).await {
                Ok(remote_id) => {
                    if let Some(remote_id) = remote_id {
                        outcome.remote_id = Some(remote_id);
                    }
                    commit(&call, op, outcome.remote_id.as_deref(), state);
                    outcome.phase = outcome.phase.settled();
                    outcome.status = OpStatus::Applied;
                    return outcome;
                }
                Err(err) if err.is_transient() && outcome.retries < self.retry.max_retries => {
                    let delay = self.retry.delay_for(outcome.retries, err.retry_after_secs());
                    if let Err(error) = self.check_budget(op, started, delay) {
                        return outcome.failed(error);
                    }

                    outcome.retries += 1;
                    warn!(
                        "{} failed ({err}), retry {}/{} in {delay:?}",
                        op.id, outcome.retries, self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;

                    match outcome.phase.transition(pending, &op.id) {
                        Ok(phase) => outcome.phase = phase,
                        Err(error) => return outcome.failed(error),
                    }
                }
                Err(source) => {
                    return outcome.failed(ReconcileError::ResourceFailed {
                        action: op.action.to_string(),
                        resource: op.id.to_string(),
                        source,
                    });
                }
            }
        }
    }

    /// Makes one provider call. Returns the new remote id for creates.
    async fn attempt(&self, call: &Call<'_>) -> Result<Option<String>, ProviderError> {
        match call {
            Call::Create(resource) => self
                .provider
                .create(resource.kind(), &resource.attributes)
                .await
                .map(Some),
            // Sensitive values are set on create only.
            Call::Update(remote_id, resource) => self
                .provider
                .update(remote_id, &resource.diffable_attributes())
                .await
                .map(|()| None),
            Call::Delete(remote_id) => match self.provider.delete(remote_id).await {
                Ok(()) => Ok(None),
                Err(ProviderError::NotFound { .. }) => {
                    debug!("{remote_id} was already gone");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Persists `state` to the checkpoint store, if any.
    async fn save_checkpoint(
        &self,
        state: &StackState,
        after: &ResourceId,
    ) -> Result<(), ReconcileError> {
        let Some(store) = self.checkpoint else {
            return Ok(());
        };

        store
            .save(state)
            .await
            .map_err(|e| ReconcileError::StateNotSaved {
                after: after.to_string(),
                message: e.to_string(),
            })
    }

    /// Fails with `Timeout` if the run cannot afford `upcoming` more time.
    fn check_budget(
        &self,
        op: &ChangeOp,
        started: Instant,
        upcoming: Duration,
    ) -> Result<(), ReconcileError> {
        let Some(budget) = self.run_timeout else {
            return Ok(());
        };

        let elapsed = started.elapsed();
        if elapsed + upcoming >= budget {
            return Err(ReconcileError::Timeout {
                resource: op.id.to_string(),
                elapsed_secs: elapsed.as_secs(),
                budget_secs: budget.as_secs(),
            });
        }
        Ok(())
    }
}

/// Phase of the op's resource before the run touches it.
fn resting_phase(state: &StackState, op: &ChangeOp) -> ResourcePhase {
    if state.contains(&op.id) {
        ResourcePhase::Created
    } else {
        ResourcePhase::Absent
    }
}

/// Resolves the provider call for an op, checking its inputs.
fn resolve_call(op: &ChangeOp) -> Result<Call<'_>, ReconcileError> {
    let malformed = |reason: &str| ReconcileError::MalformedOp {
        action: op.action.to_string(),
        resource: op.id.to_string(),
        reason: reason.to_string(),
    };

    match op.action {
        ChangeAction::Create => op
            .desired
            .as_ref()
            .map(Call::Create)
            .ok_or_else(|| malformed("no desired attributes")),
        ChangeAction::Update => match (op.remote_id.as_deref(), op.desired.as_ref()) {
            (Some(remote_id), Some(desired)) => Ok(Call::Update(remote_id, desired)),
            (None, _) => Err(malformed("no remote id")),
            (_, None) => Err(malformed("no desired attributes")),
        },
        ChangeAction::Delete => op
            .remote_id
            .as_deref()
            .map(Call::Delete)
            .ok_or_else(|| malformed("no remote id")),
        ChangeAction::NoOp => Err(malformed("no-op has no provider call")),
    }
}

/// Records a confirmed change in state.
fn commit(call: &Call<'_>, op: &ChangeOp, remote_id: Option<&str>, state: &mut StackState) {
    match (call, remote_id) {
        (Call::Create(resource) | Call::Update(_, resource), Some(remote_id)) => {
            state.record(op.id.clone(), AppliedState::from_resource(resource, remote_id));
        }
        (Call::Delete(_), _) => {
            state.remove(&op.id);
        }
        (Call::Create(_) | Call::Update(..), None) => {
            warn!("{} applied without a remote id, not recorded", op.id);
        }
    }
}

impl OpOutcome {
    fn new(index: usize, op: &ChangeOp, phase: ResourcePhase) -> Self {
        Self {
            index,
            op: op.clone(),
            status: OpStatus::NotAttempted,
            retries: 0,
            phase,
            remote_id: op.remote_id.clone(),
        }
    }

    fn failed(mut self, error: ReconcileError) -> Self {
        self.status = OpStatus::Failed { error };
        self
    }
}

impl ExecutionResult {
    /// Returns true if every op was applied.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.halted.is_none()
    }

    /// Returns the number of applied ops.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.count(|s| matches!(s, OpStatus::Applied))
    }

    /// Returns the number of failed ops (zero or one).
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, OpStatus::Failed { .. }))
    }

    /// Returns the number of ops the run never reached.
    #[must_use]
    pub fn not_attempted(&self) -> usize {
        self.count(|s| matches!(s, OpStatus::NotAttempted))
    }

    /// Returns the failed op, if any.
    #[must_use]
    pub fn failed_op(&self) -> Option<&OpOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.status, OpStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&OpStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Failed { .. } => write!(f, "failed"),
            Self::NotAttempted => write!(f, "not attempted"),
        }
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} ops in {:.1}s: {} applied, {} failed, {} not attempted",
            self.outcomes.len(),
            self.elapsed.as_secs_f64(),
            self.applied(),
            self.failed(),
            self.not_attempted()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::graph::{ResourceGraph, ResourceKind, build_stack_graph, ids};
    use crate::planner::{plan, plan_destroy};
    use crate::provider::{MemoryProvider, MockProviderClient};
    use crate::state::LocalStateStore;

    fn graph() -> ResourceGraph {
        build_stack_graph(&StackOptions::new("acme-prod", "us-central1")).expect("graph")
    }

    fn fast_retries() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
        .without_jitter()
    }

    fn executor(provider: &dyn ProviderClient) -> PlanExecutor<'_> {
        PlanExecutor::new(provider).with_retry_policy(fast_retries())
    }

    fn mock() -> MockProviderClient {
        let mut mock = MockProviderClient::new();
        mock.expect_name().return_const("mock");
        mock
    }

    #[tokio::test]
    async fn test_apply_on_empty_state_records_seven_resources() {
        let provider = MemoryProvider::new();
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider).execute(&changes, &mut state).await;

        assert!(result.success());
        assert_eq!(result.applied(), 7);
        assert_eq!(state.len(), 7);
        assert_eq!(provider.len(), 7);
        assert_eq!(state.config_hash, "h1");
        assert!(result.outcomes.iter().all(|o| o.phase == ResourcePhase::Created));

        let history = state.history.last().expect("history");
        assert!(history.success);
        assert_eq!(history.resources.len(), 7);

        let again = plan(&graph(), &state, "h1").expect("plan");
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_secrets_are_recorded_without_values() {
        let provider = MemoryProvider::new();
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");
        let _ = executor(&provider).execute(&changes, &mut state).await;

        let secret = state.get(&ids::db_password()).expect("recorded");
        assert!(!secret.attributes.contains_key("value"));
        let live = provider.get(&secret.remote_id).expect("live");
        assert!(live.contains_key("value"));
    }

    #[tokio::test]
    async fn test_two_transient_errors_then_success() {
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::database(),
            vec![
                ProviderError::unavailable("503"),
                ProviderError::RateLimited { retry_after_secs: 0 },
            ],
        );
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider).execute(&changes, &mut state).await;

        assert!(result.success());
        let db = &result.outcomes[3];
        assert_eq!(db.op.id, ids::database());
        assert_eq!(db.retries, 2);
        assert_eq!(db.status, OpStatus::Applied);
        assert!(result.outcomes.iter().filter(|o| o.index != 3).all(|o| o.retries == 0));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::service_account(),
            vec![ProviderError::unavailable("503"); 4],
        );
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider).execute(&changes, &mut state).await;

        let first = &result.outcomes[0];
        assert_eq!(first.retries, 3);
        assert!(matches!(first.status, OpStatus::Failed { .. }));
        assert_eq!(first.phase, ResourcePhase::PendingCreate);
        assert_eq!(result.not_attempted(), 6);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_on_third_op_halts() {
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::encryption_key(),
            vec![ProviderError::permission_denied("secretmanager.secrets.create")],
        );
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider).execute(&changes, &mut state).await;

        assert!(!result.success());
        assert_eq!(
            (result.applied(), result.failed(), result.not_attempted()),
            (2, 1, 4)
        );
        let failed = result.failed_op().expect("failed op");
        assert_eq!(failed.index, 2);
        assert_eq!(failed.retries, 0);
        match &failed.status {
            OpStatus::Failed {
                error: ReconcileError::ResourceFailed { resource, source, .. },
            } => {
                assert_eq!(resource, "secret/encryption-key");
                assert!(matches!(source, ProviderError::PermissionDenied { .. }));
            }
            other => panic!("unexpected status {other:?}"),
        }

        assert_eq!(state.len(), 2);
        assert!(state.contains(&ids::service_account()));
        assert!(state.contains(&ids::db_password()));
        assert_eq!(state.config_hash, "");
        assert!(!state.history.last().expect("history").success);
    }

    #[tokio::test]
    async fn test_rerun_after_failure_resumes() {
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::encryption_key(),
            vec![ProviderError::validation("bad replication")],
        );
        let mut state = StackState::new("acme-prod");
        let first = plan(&graph(), &state, "h1").expect("plan");
        let halted = executor(&provider).execute(&first, &mut state).await;
        assert_eq!(halted.applied(), 2);
        let creates_before = provider.create_count();

        let second = plan(&graph(), &state, "h1").expect("plan");
        assert_eq!(second.ops.len(), 5);
        assert!(
            second
                .ops
                .iter()
                .all(|op| op.id != ids::service_account() && op.id != ids::db_password())
        );

        let result = executor(&provider).execute(&second, &mut state).await;
        assert!(result.success());
        assert_eq!(provider.create_count(), creates_before + 5);
        assert_eq!(state.len(), 7);
    }

    #[tokio::test]
    async fn test_timeout_before_retry_sleep() {
        let provider = MemoryProvider::new();
        provider.inject(&ids::service_account(), vec![ProviderError::unavailable("503")]);
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let slow_backoff = RetryPolicy {
            base_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        let result = PlanExecutor::new(&provider)
            .with_retry_policy(slow_backoff)
            .with_run_timeout(Duration::from_secs(5))
            .execute(&changes, &mut state)
            .await;

        assert!(matches!(result.halted, Some(ReconcileError::Timeout { .. })));
        assert_eq!(result.outcomes[0].retries, 0);
        assert_eq!(result.not_attempted(), 6);
        assert_eq!(provider.create_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_blocks_next_op() {
        let provider = MemoryProvider::new();
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider)
            .with_run_timeout(Duration::ZERO)
            .execute(&changes, &mut state)
            .await;

        match &result.halted {
            Some(ReconcileError::Timeout { resource, .. }) => {
                assert_eq!(resource, "service-account/app-runtime");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(provider.create_count(), 0);
        assert_eq!(result.not_attempted(), 6);
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_succeeds() {
        let provider = MemoryProvider::new();
        let mut state = StackState::new("acme-prod");
        let apply = plan(&graph(), &state, "h1").expect("plan");
        let _ = executor(&provider).execute(&apply, &mut state).await;

        let db_remote = state.get(&ids::database()).expect("db").remote_id.clone();
        assert!(provider.forget(&db_remote));

        let destroy = plan_destroy(&state, "h1").expect("plan");
        let result = executor(&provider).execute(&destroy, &mut state).await;

        assert!(result.success());
        assert!(state.is_empty());
        assert!(provider.is_empty());
        assert!(result.outcomes.iter().all(|o| o.phase == ResourcePhase::Absent));
    }

    #[tokio::test]
    async fn test_rollback_undoes_applied_ops() {
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::cloudsql_client(),
            vec![ProviderError::Conflict {
                message: String::from("binding exists"),
            }],
        );
        let before = StackState::new("acme-prod");
        let mut state = before.clone();
        let apply = plan(&graph(), &state, "h1").expect("plan");
        let result = executor(&provider).execute(&apply, &mut state).await;
        assert_eq!(result.applied(), 5);

        let rollback = ChangePlan::rollback(&result, &before);
        assert_eq!(rollback.operation, RunOperation::Rollback);
        assert_eq!(rollback.ops.len(), 5);
        assert!(rollback.ops.iter().all(|op| op.action == ChangeAction::Delete));
        assert_eq!(rollback.ops[0].id, ids::secret_accessor());

        let undone = executor(&provider).execute(&rollback, &mut state).await;
        assert!(undone.success());
        assert!(state.is_empty());
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_of_update_restores_previous_attributes() {
        let provider = MemoryProvider::new();
        let mut state = StackState::new("acme-prod");
        let apply = plan(&graph(), &state, "h1").expect("plan");
        let _ = executor(&provider).execute(&apply, &mut state).await;
        let before = state.clone();

        let mut custom = StackOptions::new("acme-prod", "us-central1");
        custom.use_custom_image = true;
        let custom_graph = build_stack_graph(&custom).expect("graph");
        let update = plan(&custom_graph, &state, "h2").expect("plan");
        let result = executor(&provider).execute(&update, &mut state).await;
        assert_eq!(result.applied(), 1);

        let rollback = ChangePlan::rollback(&result, &before);
        assert_eq!(rollback.ops.len(), 1);
        assert_eq!(rollback.ops[0].action, ChangeAction::Update);
        let _ = executor(&provider).execute(&rollback, &mut state).await;

        let service = state.get(&ids::compute_service()).expect("service");
        assert_eq!(service.attributes["image_source"], "prebuilt");
        assert!(plan(&graph(), &state, "h1").expect("plan").is_empty());
    }

    #[tokio::test]
    async fn test_update_not_found_is_not_retried() {
        let mut provider = mock();
        provider
            .expect_update()
            .times(1)
            .returning(|remote_id, _| Err(ProviderError::not_found(remote_id)));

        let service = Resource::new(ResourceKind::ComputeService, "app").attr("max_instances", 10);
        let mut state = StackState::new("acme-prod");
        let stale = service.clone().attr("max_instances", 3);
        state.record(service.id.clone(), AppliedState::from_resource(&stale, "svc-1"));

        let mut single = ResourceGraph::new();
        single.insert(service.clone()).expect("insert");
        let only_service = plan(&single, &state, "h1").expect("plan");
        assert_eq!(only_service.ops.len(), 1);

        let result = executor(&provider).execute(&only_service, &mut state).await;
        assert_eq!(result.failed(), 1);
        assert_eq!(result.outcomes[0].retries, 0);
        assert_eq!(result.outcomes[0].phase, ResourcePhase::PendingUpdate);
        let recorded = state.get(&service.id).expect("still recorded");
        assert_eq!(recorded.remote_id, "svc-1");
        assert_eq!(recorded.attributes["max_instances"], 3);
    }

    #[tokio::test]
    async fn test_create_of_recorded_resource_is_illegal() {
        // No provider expectations: any provider call fails the test.
        let provider = mock();
        let secret = Resource::new(ResourceKind::Secret, "db-password");
        let mut state = StackState::new("acme-prod");
        state.record(secret.id.clone(), AppliedState::from_resource(&secret, "s-1"));

        let mut bad = ChangePlan::empty("h1");
        bad.ops.push(ChangeOp {
            id: secret.id.clone(),
            action: ChangeAction::Create,
            reason: String::new(),
            desired: Some(secret),
            remote_id: None,
            changes: vec![],
        });

        let result = executor(&provider).execute(&bad, &mut state).await;
        assert!(matches!(
            result.halted,
            Some(ReconcileError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_secret_update_does_not_resend_value() {
        let mut provider = mock();
        provider
            .expect_update()
            .withf(|_, attrs| {
                !attrs.contains_key("value")
                    && attrs.get("replication") == Some(&serde_json::json!("automatic"))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let secret = graph().get(&ids::db_password()).expect("secret").clone();
        let recorded = secret.clone().attr("replication", "user-managed");
        let mut state = StackState::new("acme-prod");
        state.record(secret.id.clone(), AppliedState::from_resource(&recorded, "s-1"));

        let mut single = ResourceGraph::new();
        single.insert(secret).expect("insert");
        let changes = plan(&single, &state, "h1").expect("plan");
        assert_eq!(changes.ops.len(), 1);
        assert_eq!(changes.ops[0].action, ChangeAction::Update);

        let result = executor(&provider).execute(&changes, &mut state).await;
        assert!(result.success());
        let stored = state.get(&ids::db_password()).expect("recorded");
        assert_eq!(stored.attributes["replication"], "automatic");
        assert!(!stored.attributes.contains_key("value"));
    }

    #[tokio::test]
    async fn test_checkpoint_persists_each_committed_op() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = MemoryProvider::new();
        provider.inject(
            &ids::encryption_key(),
            vec![ProviderError::validation("bad replication")],
        );
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider)
            .with_checkpoint(&store)
            .execute(&changes, &mut state)
            .await;

        assert_eq!(result.applied(), 2);
        let saved = store.load().await.expect("load").expect("saved");
        assert_eq!(saved.len(), 2);
        assert!(saved.contains(&ids::db_password()));
    }

    #[tokio::test]
    async fn test_failed_checkpoint_halts_run() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        // A plain file where the state directory should be makes every save fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").expect("write");
        let store = LocalStateStore::with_base_dir(blocked.join("state"));
        let provider = MemoryProvider::new();
        let mut state = StackState::new("acme-prod");
        let changes = plan(&graph(), &state, "h1").expect("plan");

        let result = executor(&provider)
            .with_checkpoint(&store)
            .execute(&changes, &mut state)
            .await;

        match &result.halted {
            Some(ReconcileError::StateNotSaved { after, .. }) => {
                assert_eq!(after, "service-account/app-runtime");
            }
            other => panic!("expected a state save failure, got {other:?}"),
        }
        assert_eq!(
            (result.applied(), result.failed(), result.not_attempted()),
            (1, 0, 6)
        );
        assert!(state.contains(&ids::service_account()));
        assert_eq!(provider.create_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_receives_sensitive_attributes() {
        let mut provider = mock();
        provider
            .expect_create()
            .withf(|kind, attrs| *kind == ResourceKind::Secret && attrs.contains_key("value"))
            .times(1)
            .returning(|_, _| Ok(String::from("projects/acme-prod/secrets/db-password")));

        let graph = graph();
        let secret = graph.get(&ids::db_password()).expect("secret").clone();
        let mut single = ResourceGraph::new();
        single.insert(secret).expect("insert");

        let mut state = StackState::new("acme-prod");
        let changes = plan(&single, &state, "h1").expect("plan");
        let result = executor(&provider).execute(&changes, &mut state).await;

        assert!(result.success());
        assert_eq!(
            result.outcomes[0].remote_id.as_deref(),
            Some("projects/acme-prod/secrets/db-password")
        );
        assert_eq!(
            state.get(&ids::db_password()).map(|a| a.remote_id.as_str()),
            Some("projects/acme-prod/secrets/db-password")
        );
    }
}
