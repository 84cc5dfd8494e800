//! Execution engine.
//!
//! Drives one claimed execution through the workflow state machine:
//! `pending -> running -> {completed | failed | cancelled}`. Per action, the
//! engine executes through the registry, appends exactly one log row, and
//! only then moves to the next index. A failed action stops the loop; later
//! indices stay unlogged. There is no automatic retry at any level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::cancel::CancelRegistry;
use crate::actions::{ActionContext, ActionRegistry};
use crate::condition::evaluate;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::{ActionLogEntry, ActionLogStatus, Execution, ExecutionStatus, SqliteStorage};
use crate::workflow::{ActionParams, ActionSpec, Workflow};

/// Status detail recorded when the condition gate declined the payload.
pub const STATUS_DETAIL_CONDITION_NOT_MATCHED: &str = "condition_not_matched";
/// Status detail recorded when the execution ceiling expired at a boundary.
pub const STATUS_DETAIL_DEADLINE_EXCEEDED: &str = "deadline_exceeded";
/// Status detail recorded when a graceful shutdown stopped the run.
pub const STATUS_DETAIL_SHUTDOWN: &str = "shutdown";
/// Status detail recorded when the workflow row is gone at run time.
pub const STATUS_DETAIL_WORKFLOW_MISSING: &str = "workflow_missing";

/// Workflow execution engine.
#[derive(Clone)]
pub struct Engine {
    registry: ActionRegistry,
    storage: SqliteStorage,
    cancel_registry: CancelRegistry,
    shutdown: Option<Arc<ShutdownCoordinator>>,
    default_action_timeout_secs: u64,
    max_execution_secs: Option<u64>,
}

impl Engine {
    /// Create a new engine with default timeout settings.
    pub fn new(registry: ActionRegistry, storage: SqliteStorage) -> Self {
        let defaults = EngineConfig::default();
        Self {
            registry,
            storage,
            cancel_registry: CancelRegistry::new(),
            shutdown: None,
            default_action_timeout_secs: defaults.default_action_timeout_secs,
            max_execution_secs: defaults.max_execution_secs,
        }
    }

    /// Apply timeout settings from configuration.
    pub fn with_engine_config(mut self, config: &EngineConfig) -> Self {
        self.default_action_timeout_secs = config.default_action_timeout_secs;
        self.max_execution_secs = config.max_execution_secs;
        self
    }

    /// Attach a shutdown coordinator so runs stop at the next action boundary.
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The registry of per-execution cancellation signals.
    pub fn cancel_registry(&self) -> &CancelRegistry {
        &self.cancel_registry
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Claim a pending execution and run it to a terminal status.
    ///
    /// Returns `Error::ClaimConflict` when another worker (or a cancellation)
    /// got the row first; callers treat that as a normal no-op. Action
    /// failures do not surface as errors here: they are recorded in the
    /// action log and the returned execution carries the `failed` status.
    #[instrument(name = "execution.run", skip(self), fields(execution_id = %execution_id))]
    pub async fn run(&self, execution_id: &str) -> Result<Execution> {
        let execution = self
            .storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::Execution(format!("Execution not found: {}", execution_id)))?;

        self.storage.claim_execution(execution_id).await?;

        // The claim is held from here on: whatever happens inside, release
        // the signal registry and the gauge, and never leave the row in
        // `running`.
        let cancel_signal = self.cancel_registry.register(execution_id).await;
        metrics::inc_active_executions();

        let outcome = self.run_claimed(&execution, &cancel_signal).await;

        self.cancel_registry.unregister(execution_id).await;
        metrics::dec_active_executions();

        match outcome {
            Ok(finished) => Ok(finished),
            Err(e) => {
                // Best effort: close the row as failed so it cannot sit in
                // `running` forever. The conditional update backs off when
                // another path already finalized it.
                match self
                    .storage
                    .finalize_execution(execution_id, ExecutionStatus::Failed, Some(e.code()))
                    .await
                {
                    Ok(true) => {
                        metrics::record_execution("failed", execution.triggered_by.kind());
                        warn!(
                            "Execution {} aborted and was finalized as failed: {}",
                            execution_id, e
                        );
                    }
                    Ok(false) => {}
                    Err(finalize_err) => {
                        error!(
                            "Execution {} aborted ({}) and could not be finalized: {}",
                            execution_id, e, finalize_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Body of `run` once the claim is held. Any `Err` return leaves
    /// finalization and signal cleanup to the caller.
    async fn run_claimed(
        &self,
        execution: &Execution,
        cancel_signal: &AtomicBool,
    ) -> Result<Execution> {
        let execution_id = execution.id.as_str();
        let trigger_kind = execution.triggered_by.kind();
        let run_started = Instant::now();

        let workflow = match self.storage.get_workflow(&execution.workflow_id).await? {
            Some(workflow) => workflow,
            None => {
                self.storage
                    .finalize_execution(
                        execution_id,
                        ExecutionStatus::Failed,
                        Some(STATUS_DETAIL_WORKFLOW_MISSING),
                    )
                    .await?;
                metrics::record_execution("failed", trigger_kind);
                return Err(Error::Workflow(format!(
                    "Workflow {} not found for execution {}",
                    execution.workflow_id, execution_id
                )));
            }
        };

        info!(
            "Running execution {} of workflow '{}' ({} actions)",
            execution_id,
            workflow.name,
            workflow.actions.len()
        );

        // Condition gate: a non-matching payload completes immediately with
        // zero action logs.
        if let Some(condition) = &workflow.condition {
            if !evaluate(condition, &execution.payload) {
                info!(
                    "Execution {} condition did not match; completing without actions",
                    execution_id
                );
                self.storage
                    .finalize_execution(
                        execution_id,
                        ExecutionStatus::Completed,
                        Some(STATUS_DETAIL_CONDITION_NOT_MATCHED),
                    )
                    .await?;
                metrics::record_execution("completed", trigger_kind);
                metrics::record_execution_duration(run_started.elapsed(), &workflow.name);
                return self.reload(execution_id).await;
            }
        }

        let deadline = self
            .max_execution_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let mut final_status = ExecutionStatus::Completed;
        let mut status_detail: Option<&str> = None;

        for (index, spec) in workflow.actions.iter().enumerate() {
            let index = index as u32;

            // Boundary checks. An in-flight action always finishes and gets
            // its log row before any of these take effect.
            if self.is_shutdown_requested() {
                info!(
                    "Stopping execution {} before action {} for shutdown",
                    execution_id, index
                );
                final_status = ExecutionStatus::Failed;
                status_detail = Some(STATUS_DETAIL_SHUTDOWN);
                break;
            }

            // The in-process signal is the fast path; the row flag is what a
            // cancel from another engine or process lands on.
            if cancel_signal.load(Ordering::SeqCst)
                || self.storage.cancel_requested(execution_id).await?
            {
                info!(
                    "Cancelling execution {} before action {}",
                    execution_id, index
                );
                final_status = ExecutionStatus::Cancelled;
                break;
            }

            if let Some(deadline) = deadline {
                if remaining_until(deadline).is_none() {
                    warn!(
                        "Execution {} exceeded its time ceiling before action {}",
                        execution_id, index
                    );
                    final_status = ExecutionStatus::Failed;
                    status_detail = Some(STATUS_DETAIL_DEADLINE_EXCEEDED);
                    break;
                }
            }

            let kind = spec.params.kind();
            let ctx = ActionContext::new(&execution.tenant_id, &execution.id, index)
                .with_workflow_id(&workflow.id)
                .with_payload(execution.payload.clone());

            debug!("Executing action {} [{}]", index, kind);

            let action_timeout = self.effective_timeout(spec, deadline);
            let started_at = Utc::now();
            let action_start = Instant::now();

            let result = match action_timeout {
                Some(limit) => {
                    match timeout(limit, self.registry.execute(&spec.params, &ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(format!(
                            "Action {} ({}) timed out after {}s",
                            index,
                            kind,
                            limit.as_secs()
                        ))),
                    }
                }
                None => self.registry.execute(&spec.params, &ctx).await,
            };

            let finished_at = Utc::now();
            metrics::record_action_duration(action_start.elapsed(), kind);

            // One log row per executed action, written before the next
            // action starts.
            match result {
                Ok(outcome) => {
                    let status = if outcome.skipped {
                        ActionLogStatus::Skipped
                    } else {
                        ActionLogStatus::Succeeded
                    };
                    metrics::record_action(kind, &status.to_string());
                    self.storage
                        .append_action_log(&ActionLogEntry {
                            execution_id: execution.id.clone(),
                            action_index: index,
                            action_type: kind.to_string(),
                            status,
                            output: if outcome.output.is_null() {
                                None
                            } else {
                                Some(outcome.output)
                            },
                            error: None,
                            error_code: None,
                            started_at,
                            finished_at,
                        })
                        .await?;
                }
                Err(e) => {
                    error!(
                        "Action {} [{}] of execution {} failed: {}",
                        index, kind, execution_id, e
                    );
                    metrics::record_action(kind, "failed");
                    self.storage
                        .append_action_log(&ActionLogEntry {
                            execution_id: execution.id.clone(),
                            action_index: index,
                            action_type: kind.to_string(),
                            status: ActionLogStatus::Failed,
                            output: None,
                            error: Some(e.to_string()),
                            error_code: Some(e.code().to_string()),
                            started_at,
                            finished_at,
                        })
                        .await?;
                    final_status = ExecutionStatus::Failed;
                    break;
                }
            }
        }

        let finalized = self
            .storage
            .finalize_execution(execution_id, final_status, status_detail)
            .await?;
        if !finalized {
            // Some other path (a racing cancel, an operator fix-up) already
            // moved the row to a terminal status; theirs stands.
            warn!(
                "Execution {} was finalized elsewhere; keeping the stored status",
                execution_id
            );
        }

        metrics::record_execution(&final_status.to_string(), trigger_kind);
        metrics::record_execution_duration(run_started.elapsed(), &workflow.name);

        let execution = self.reload(execution_id).await?;
        info!(
            "Execution {} finished with status {}{}",
            execution_id,
            execution.status,
            execution
                .status_detail
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
        Ok(execution)
    }

    /// Cancel an execution.
    ///
    /// Pending executions are cancelled directly through the claim primitive.
    /// For running ones the request is recorded on the row itself, so the
    /// engine holding the claim observes it at its next action boundary and
    /// performs the `running -> cancelled` transition there, whichever
    /// process it lives in. Cancelling an already-terminal execution is an
    /// error.
    pub async fn cancel(&self, execution_id: &str) -> Result<Execution> {
        let execution = self
            .storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::Execution(format!("Execution not found: {}", execution_id)))?;

        if execution.status.is_terminal() {
            return Err(Error::Execution(format!(
                "Cannot cancel execution '{}': status is '{}'",
                execution_id, execution.status
            )));
        }

        // Record the request durably first: if a claim lands between the
        // lookup above and the update below, the claim owner still sees the
        // flag at its first action boundary.
        self.storage.request_cancel(execution_id).await?;
        // Fast path for a run inside this process.
        self.cancel_registry.request_cancel(execution_id).await;

        if execution.status == ExecutionStatus::Pending
            && self
                .storage
                .cancel_pending_execution(execution_id, None)
                .await?
        {
            info!("Cancelled pending execution {}", execution_id);
        } else {
            info!(
                "Cancellation requested for execution {}; it stops at its next action boundary",
                execution_id
            );
        }
        self.reload(execution_id).await
    }

    /// Per-action timeout: the step's own, or the engine default for action
    /// types that have one, capped by whatever remains of the execution
    /// ceiling. Delay actions carry no default; their duration is the
    /// parameter itself.
    fn effective_timeout(&self, spec: &ActionSpec, deadline: Option<Instant>) -> Option<Duration> {
        let configured = spec
            .timeout_secs
            .map(Duration::from_secs)
            .or(match spec.params {
                ActionParams::Delay { .. } => None,
                _ => Some(Duration::from_secs(self.default_action_timeout_secs)),
            });

        let remaining =
            deadline.map(|deadline| remaining_until(deadline).unwrap_or(Duration::ZERO));

        match (configured, remaining) {
            (Some(t), Some(r)) => Some(t.min(r)),
            (Some(t), None) => Some(t),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }

    async fn reload(&self, execution_id: &str) -> Result<Execution> {
        self.storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::Execution(format!("Execution not found: {}", execution_id)))
    }
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::providers::testing::{RecordingSender, RecordingUpdater};
    use crate::actions::{
        Action, ActionOutcome, DelayAction, SendNotificationAction, UpdateFieldAction,
    };
    use crate::storage::TriggeredBy;
    use crate::workflow::{ActionSpec, Trigger, Workflow};
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        storage: SqliteStorage,
        engine: Engine,
        sender: Arc<RecordingSender>,
        updater: Arc<RecordingUpdater>,
    }

    fn harness_with(sender: Arc<RecordingSender>) -> Harness {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let updater = Arc::new(RecordingUpdater::default());

        let mut registry = ActionRegistry::empty();
        registry.register(Arc::new(SendNotificationAction::new(sender.clone())));
        registry.register(Arc::new(UpdateFieldAction::new(updater.clone())));
        registry.register(Arc::new(DelayAction::new()));

        let engine = Engine::new(registry, storage.clone());
        Harness {
            storage,
            engine,
            sender,
            updater,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(RecordingSender::default()))
    }

    fn notify_spec() -> ActionSpec {
        ActionSpec::new(ActionParams::SendNotification {
            recipient: "sales@acme.test".to_string(),
            subject: Some("New lead".to_string()),
            body: "A lead was created".to_string(),
        })
    }

    fn update_spec() -> ActionSpec {
        ActionSpec::new(ActionParams::UpdateField {
            entity: "lead".to_string(),
            record_id_field: "id".to_string(),
            field: "status".to_string(),
            value: json!("contacted"),
        })
    }

    async fn admit(h: &Harness, workflow: &Workflow, payload: serde_json::Value) -> Execution {
        h.storage.save_workflow(workflow).await.unwrap();
        let execution = Execution::admitted(
            workflow,
            TriggeredBy::Manual {
                actor: "ops@acme.test".to_string(),
            },
            payload,
        );
        h.storage.save_execution(&execution).await.unwrap();
        execution
    }

    #[tokio::test]
    async fn test_run_completes_and_logs_every_action() {
        let h = harness();
        let workflow = Workflow::new("t-acme", "lead-intake", Trigger::Manual)
            .with_action(notify_spec())
            .with_action(update_spec());
        let execution = admit(&h, &workflow, json!({"id": "lead-7", "status": "new"})).await;

        let finished = h.engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.status_detail, None);
        assert!(finished.finished_at.is_some());

        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action_index, 0);
        assert_eq!(logs[0].action_type, "send_notification");
        assert_eq!(logs[0].status, ActionLogStatus::Succeeded);
        assert_eq!(logs[1].action_index, 1);
        assert_eq!(logs[1].action_type, "update_field");
        assert_eq!(logs[1].status, ActionLogStatus::Succeeded);

        let sent = h.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].idempotency_key, format!("{}:0", execution.id));

        let applied = h.updater.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].record_id, "lead-7");
        assert_eq!(applied[0].idempotency_key, format!("{}:1", execution.id));
    }

    #[tokio::test]
    async fn test_condition_gate_completes_without_logs() {
        let h = harness();
        let workflow = Workflow::new("t-acme", "vip-only", Trigger::Manual)
            .with_condition(crate::condition::Condition::Eq {
                field: "plan".to_string(),
                value: json!("enterprise"),
            })
            .with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({"plan": "starter"})).await;

        let finished = h.engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(
            finished.status_detail.as_deref(),
            Some(STATUS_DETAIL_CONDITION_NOT_MATCHED)
        );

        assert!(h
            .storage
            .get_action_logs(&execution.id)
            .await
            .unwrap()
            .is_empty());
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matching_condition_runs_actions() {
        let h = harness();
        let workflow = Workflow::new("t-acme", "vip-only", Trigger::Manual)
            .with_condition(crate::condition::Condition::Eq {
                field: "plan".to_string(),
                value: json!("enterprise"),
            })
            .with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({"plan": "enterprise"})).await;

        let finished = h.engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.status_detail, None);
        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_leaves_later_actions_unlogged() {
        // First notification succeeds, second fails, third never runs.
        let h = harness_with(Arc::new(RecordingSender::failing_after(1)));
        let workflow = Workflow::new("t-acme", "three-steps", Trigger::Manual)
            .with_action(notify_spec())
            .with_action(notify_spec())
            .with_action(update_spec());
        let execution = admit(&h, &workflow, json!({"id": "lead-1"})).await;

        let finished = h.engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);

        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, ActionLogStatus::Succeeded);
        assert_eq!(logs[1].status, ActionLogStatus::Failed);
        assert_eq!(logs[1].error_code.as_deref(), Some("PROVIDER_ERROR"));
        assert!(logs[1].error.as_deref().unwrap_or("").contains("rejected"));

        // The update_field action at index 2 was never attempted.
        assert!(h.updater.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_timeout_fails_the_execution() {
        // Notify, then a delay that overruns its timeout, then an update
        // that must never start.
        let h = harness();
        let workflow = Workflow::new("t-acme", "slow-step", Trigger::Manual)
            .with_action(notify_spec())
            .with_action(
                ActionSpec::new(ActionParams::Delay { seconds: 5 }).with_timeout_secs(1),
            )
            .with_action(update_spec());
        let execution = admit(&h, &workflow, json!({"id": "lead-1"})).await;

        let started = Instant::now();
        let finished = h.engine.run(&execution.id).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));

        assert_eq!(finished.status, ExecutionStatus::Failed);
        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, ActionLogStatus::Succeeded);
        assert_eq!(logs[1].status, ActionLogStatus::Failed);
        assert_eq!(logs[1].error_code.as_deref(), Some("TIMEOUT"));
        assert!(h.updater.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_ceiling_caps_action_time() {
        let h = harness();
        let engine = h.engine.clone().with_engine_config(&EngineConfig {
            default_action_timeout_secs: 30,
            max_execution_secs: Some(1),
            allow_private_webhooks: false,
        });
        let workflow = Workflow::new("t-acme", "too-slow", Trigger::Manual)
            .with_action(ActionSpec::new(ActionParams::Delay { seconds: 5 }));
        let execution = admit(&h, &workflow, json!({})).await;

        let started = Instant::now();
        let finished = engine.run(&execution.id).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(finished.status, ExecutionStatus::Failed);

        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_code.as_deref(), Some("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_exhausted_ceiling_stops_at_boundary() {
        let h = harness();
        let engine = h.engine.clone().with_engine_config(&EngineConfig {
            default_action_timeout_secs: 30,
            max_execution_secs: Some(0),
            allow_private_webhooks: false,
        });
        let workflow =
            Workflow::new("t-acme", "no-headroom", Trigger::Manual).with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let finished = engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert_eq!(
            finished.status_detail.as_deref(),
            Some(STATUS_DETAIL_DEADLINE_EXCEEDED)
        );

        // The boundary check fired before any action ran.
        assert!(h
            .storage
            .get_action_logs(&execution.id)
            .await
            .unwrap()
            .is_empty());
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runs_execute_actions_once() {
        let h = harness();
        let workflow =
            Workflow::new("t-acme", "race", Trigger::Manual).with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let first = {
            let engine = h.engine.clone();
            let id = execution.id.clone();
            tokio::spawn(async move { engine.run(&id).await })
        };
        let second = {
            let engine = h.engine.clone();
            let id = execution.id.clone();
            tokio::spawn(async move { engine.run(&id).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::ClaimConflict(_)))));

        // The losing claim never re-ran the notification.
        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_wins_over_claim() {
        let h = harness();
        let workflow =
            Workflow::new("t-acme", "cancel-early", Trigger::Manual).with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let cancelled = h.engine.cancel(&execution.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

        let err = h.engine.run(&execution.id).await.unwrap_err();
        assert!(matches!(err, Error::ClaimConflict(_)));
        assert!(h.sender.sent.lock().unwrap().is_empty());

        // Terminal executions cannot be cancelled again.
        assert!(h.engine.cancel(&execution.id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_running_takes_effect_at_boundary() {
        let h = harness();
        let workflow = Workflow::new("t-acme", "cancel-mid", Trigger::Manual)
            .with_action(ActionSpec::new(ActionParams::Delay { seconds: 1 }))
            .with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let runner = {
            let engine = h.engine.clone();
            let id = execution.id.clone();
            tokio::spawn(async move { engine.run(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        h.engine.cancel(&execution.id).await.unwrap();

        let finished = runner.await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Cancelled);

        // The in-flight delay finished and was logged; the notification at
        // index 1 was never reached.
        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action_type, "delay");
        assert_eq!(logs[0].status, ActionLogStatus::Succeeded);
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_from_another_engine_stops_at_boundary() {
        let h = harness();
        let workflow = Workflow::new("t-acme", "cancel-cross", Trigger::Manual)
            .with_action(ActionSpec::new(ActionParams::Delay { seconds: 1 }))
            .with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let runner = {
            let engine = h.engine.clone();
            let id = execution.id.clone();
            tokio::spawn(async move { engine.run(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;

        // An admin engine with its own empty registry, the way the CLI
        // builds one. The request still has to reach the worker.
        let admin = Engine::new(ActionRegistry::empty(), h.storage.clone());
        let requested = admin.cancel(&execution.id).await.unwrap();
        assert_eq!(requested.status, ExecutionStatus::Running);

        // The worker records the terminal status itself: the in-flight
        // delay completes and is logged, nothing runs after it.
        let finished = runner.await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Cancelled);

        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action_type, "delay");
        assert_eq!(logs[0].status, ActionLogStatus::Succeeded);
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_request_before_claim_stops_before_first_action() {
        let h = harness();
        let workflow =
            Workflow::new("t-acme", "cancel-flagged", Trigger::Manual).with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        // The durable request landed but the pending-row cancel lost the
        // race to a claim. The first boundary check must still honor it.
        assert!(h.storage.request_cancel(&execution.id).await.unwrap());

        let finished = h.engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Cancelled);
        assert!(h
            .storage
            .get_action_logs(&execution.id)
            .await
            .unwrap()
            .is_empty());
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_write_failure_still_finalizes_the_run() {
        let h = harness();
        let workflow =
            Workflow::new("t-acme", "log-conflict", Trigger::Manual).with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        // Occupy the index-0 log slot so the engine's own append violates
        // the primary key mid-run.
        let now = Utc::now();
        h.storage
            .append_action_log(&ActionLogEntry {
                execution_id: execution.id.clone(),
                action_index: 0,
                action_type: "send_notification".to_string(),
                status: ActionLogStatus::Succeeded,
                output: None,
                error: None,
                error_code: None,
                started_at: now,
                finished_at: now,
            })
            .await
            .unwrap();

        let err = h.engine.run(&execution.id).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));

        // The row must not stay in `running`: the run is closed as failed
        // with the error's stable code as detail.
        let stored = h
            .storage
            .get_execution(&execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.status_detail.as_deref(), Some("DATABASE_ERROR"));
        assert!(stored.finished_at.is_some());

        // And the cancellation signal was released on the way out.
        assert!(!h.engine.cancel_registry().request_cancel(&execution.id).await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_actions() {
        let h = harness();
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let engine = h.engine.clone().with_shutdown(shutdown.clone());

        let workflow = Workflow::new("t-acme", "drain", Trigger::Manual)
            .with_action(ActionSpec::new(ActionParams::Delay { seconds: 1 }))
            .with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let runner = {
            let engine = engine.clone();
            let id = execution.id.clone();
            tokio::spawn(async move { engine.run(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.request_shutdown();

        let finished = runner.await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert_eq!(
            finished.status_detail.as_deref(),
            Some(STATUS_DETAIL_SHUTDOWN)
        );

        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ActionLogStatus::Succeeded);
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_action_type_fails_cleanly() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let engine = Engine::new(ActionRegistry::empty(), storage.clone());

        let workflow = Workflow::new("t-acme", "no-executors", Trigger::Manual)
            .with_action(ActionSpec::new(ActionParams::Delay { seconds: 1 }));
        storage.save_workflow(&workflow).await.unwrap();
        let execution = Execution::admitted(
            &workflow,
            TriggeredBy::Manual {
                actor: "ops@acme.test".to_string(),
            },
            json!({}),
        );
        storage.save_execution(&execution).await.unwrap();

        let finished = engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);

        let logs = storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_code.as_deref(), Some("UNSUPPORTED_ACTION"));
    }

    struct SkippingDelay;

    #[async_trait]
    impl Action for SkippingDelay {
        fn action_type(&self) -> &str {
            "delay"
        }

        async fn execute(
            &self,
            _params: &ActionParams,
            _ctx: &ActionContext,
        ) -> Result<ActionOutcome> {
            Ok(ActionOutcome::skipped(json!({"reason": "outside window"})))
        }
    }

    #[tokio::test]
    async fn test_skipped_action_continues_the_run() {
        let h = harness();
        let mut registry = ActionRegistry::empty();
        registry.register(Arc::new(SkippingDelay));
        registry.register(Arc::new(SendNotificationAction::new(h.sender.clone())));
        let engine = Engine::new(registry, h.storage.clone());

        let workflow = Workflow::new("t-acme", "skip-then-send", Trigger::Manual)
            .with_action(ActionSpec::new(ActionParams::Delay { seconds: 30 }))
            .with_action(notify_spec());
        let execution = admit(&h, &workflow, json!({})).await;

        let finished = engine.run(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);

        let logs = h.storage.get_action_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, ActionLogStatus::Skipped);
        assert_eq!(logs[1].status, ActionLogStatus::Succeeded);
        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
    }
}
