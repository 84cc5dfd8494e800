//! Trigger dispatcher.
//!
//! The single ingress point for starting workflow executions. Admission is
//! synchronous (a `pending` row exists before any dispatch call returns);
//! completion is asynchronous (each admitted execution runs in its own
//! spawned task). The dispatcher performs no authorization: manual dispatch
//! requires a `TriggerCapability` the caller constructs only after its own
//! permission check.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::storage::{Execution, SqliteStorage, TriggeredBy};
use crate::triggers::bus::EventMessage;
use crate::workflow::Trigger;

/// Proof of a completed authorization check for manual dispatch.
///
/// The excluded permission layer decides who may trigger what; this object
/// only carries the outcome. Holding one scopes dispatch to a single tenant.
#[derive(Debug, Clone)]
pub struct TriggerCapability {
    tenant_id: String,
    actor: String,
}

impl TriggerCapability {
    /// Build a capability for an actor the caller has already authorized.
    pub fn granted(tenant_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor: actor.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

/// Receives trigger signals and admits one execution per matching active
/// workflow.
#[derive(Clone)]
pub struct TriggerDispatcher {
    storage: SqliteStorage,
    engine: Engine,
}

impl TriggerDispatcher {
    pub fn new(storage: SqliteStorage, engine: Engine) -> Self {
        Self { storage, engine }
    }

    /// Manually trigger a workflow, returning the admitted execution's id.
    ///
    /// Works for any active workflow of the capability's tenant, whatever
    /// its declared trigger: the declared trigger describes the automatic
    /// path, and "run now" is an operator decision on top of it. Workflows
    /// of other tenants are reported as not found.
    pub async fn dispatch_manual(
        &self,
        workflow_id: &str,
        payload: Value,
        capability: &TriggerCapability,
    ) -> Result<String> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .filter(|w| w.tenant_id == capability.tenant_id())
            .ok_or_else(|| Error::Workflow(format!("Workflow not found: {}", workflow_id)))?;

        if !workflow.active {
            return Err(Error::Validation(format!(
                "Workflow '{}' is not active",
                workflow.name
            )));
        }

        let execution = Execution::admitted(
            &workflow,
            TriggeredBy::Manual {
                actor: capability.actor().to_string(),
            },
            payload,
        );
        self.storage.save_execution(&execution).await?;

        info!(
            "Admitted manual execution {} of workflow '{}' (actor: {})",
            execution.id,
            workflow.name,
            capability.actor()
        );

        self.spawn_run(execution.id.clone());
        Ok(execution.id)
    }

    /// Fan a domain event out to every matching active workflow.
    ///
    /// A match is an active workflow of the event's tenant whose trigger
    /// listens for the event's name. Each match becomes an independent
    /// execution with its own id and its own snapshot of the payload; zero
    /// matches is a normal outcome, not an error.
    pub async fn on_event(&self, message: &EventMessage) -> Result<Vec<String>> {
        let workflows = self.storage.list_active_by_trigger_kind("event").await?;

        let mut admitted = Vec::new();
        for workflow in workflows {
            if workflow.tenant_id != message.tenant_id {
                continue;
            }
            if workflow.trigger.event_name() != Some(message.event.as_str()) {
                continue;
            }

            let execution = Execution::admitted(
                &workflow,
                TriggeredBy::Event {
                    event: message.event.clone(),
                },
                message.payload.clone(),
            );
            self.storage.save_execution(&execution).await?;

            debug!(
                "Event '{}' admitted execution {} of workflow '{}'",
                message.event, execution.id, workflow.name
            );
            self.spawn_run(execution.id.clone());
            admitted.push(execution.id);
        }

        if !admitted.is_empty() {
            info!(
                "Event '{}' for tenant {} admitted {} execution(s)",
                message.event,
                message.tenant_id,
                admitted.len()
            );
        }
        Ok(admitted)
    }

    /// Admit one execution per schedule-triggered workflow whose interval
    /// has elapsed.
    ///
    /// Due-ness compares the workflow's interval against the most recent
    /// schedule-triggered admission; a workflow with no prior admission is
    /// due immediately. Passing `now` keeps the check independent of tick
    /// cadence and testable without a clock.
    pub async fn on_schedule(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let workflows = self.storage.list_active_by_trigger_kind("schedule").await?;
        if workflows.is_empty() {
            return Ok(Vec::new());
        }

        let latest = self.storage.latest_schedule_admissions().await?;

        let mut admitted = Vec::new();
        for workflow in workflows {
            let every_minutes = match &workflow.trigger {
                Trigger::Schedule { every_minutes } => *every_minutes,
                _ => continue,
            };

            let due = match latest.get(&workflow.id) {
                None => true,
                Some(last) => *last + Duration::minutes(i64::from(every_minutes)) <= now,
            };
            if !due {
                continue;
            }

            let execution =
                Execution::admitted(&workflow, TriggeredBy::Schedule, serde_json::json!({}));
            self.storage.save_execution(&execution).await?;

            info!(
                "Schedule admitted execution {} of workflow '{}' (every {} min)",
                execution.id, workflow.name, every_minutes
            );
            self.spawn_run(execution.id.clone());
            admitted.push(execution.id);
        }
        Ok(admitted)
    }

    /// Re-dispatch executions still `pending` from a previous process.
    ///
    /// Safe to race with live dispatch: the claim discipline guarantees
    /// each execution still runs at most once.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self.storage.list_pending_executions().await?;
        let count = pending.len();
        if count == 0 {
            debug!("No pending executions to recover");
            return Ok(0);
        }

        info!("Recovering {} pending execution(s)", count);
        for execution in pending {
            self.spawn_run(execution.id);
        }
        Ok(count)
    }

    fn spawn_run(&self, execution_id: String) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match engine.run(&execution_id).await {
                Ok(_) => {}
                Err(Error::ClaimConflict(_)) => {
                    debug!("Execution {} was already claimed elsewhere", execution_id);
                }
                Err(e) => {
                    error!("Execution {} did not run: {}", execution_id, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::providers::testing::{RecordingSender, RecordingUpdater};
    use crate::actions::{
        ActionRegistry, DelayAction, SendNotificationAction, UpdateFieldAction,
    };
    use crate::storage::ExecutionStatus;
    use crate::workflow::{ActionParams, ActionSpec, Workflow};
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> (SqliteStorage, TriggerDispatcher, Arc<RecordingSender>) {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let sender = Arc::new(RecordingSender::default());

        let mut registry = ActionRegistry::empty();
        registry.register(Arc::new(SendNotificationAction::new(sender.clone())));
        registry.register(Arc::new(UpdateFieldAction::new(Arc::new(
            RecordingUpdater::default(),
        ))));
        registry.register(Arc::new(DelayAction::new()));

        let engine = Engine::new(registry, storage.clone());
        let dispatcher = TriggerDispatcher::new(storage.clone(), engine);
        (storage, dispatcher, sender)
    }

    fn notify_workflow(tenant: &str, name: &str, trigger: Trigger) -> Workflow {
        Workflow::new(tenant, name, trigger).with_action(ActionSpec::new(
            ActionParams::SendNotification {
                recipient: "sales@acme.test".to_string(),
                subject: None,
                body: "ping".to_string(),
            },
        ))
    }

    async fn wait_terminal(storage: &SqliteStorage, id: &str) -> Execution {
        for _ in 0..300 {
            if let Some(execution) = storage.get_execution(id).await.unwrap() {
                if execution.status.is_terminal() {
                    return execution;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("execution {} never reached a terminal status", id);
    }

    #[tokio::test]
    async fn test_manual_dispatch_admits_and_runs() {
        let (storage, dispatcher, sender) = dispatcher();
        let workflow = notify_workflow("t-acme", "manual-ping", Trigger::Manual);
        storage.save_workflow(&workflow).await.unwrap();

        let capability = TriggerCapability::granted("t-acme", "ops@acme.test");
        let id = dispatcher
            .dispatch_manual(&workflow.id, json!({"note": "hi"}), &capability)
            .await
            .unwrap();

        // Admission is synchronous: the row exists as soon as dispatch returns.
        let admitted = storage.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(admitted.workflow_id, workflow.id);
        assert_eq!(admitted.payload, json!({"note": "hi"}));
        match &admitted.triggered_by {
            TriggeredBy::Manual { actor } => assert_eq!(actor, "ops@acme.test"),
            other => panic!("unexpected trigger: {:?}", other),
        }

        let finished = wait_terminal(&storage, &id).await;
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_dispatch_rejects_inactive_workflow() {
        let (storage, dispatcher, _) = dispatcher();
        let mut workflow = notify_workflow("t-acme", "paused", Trigger::Manual);
        workflow.active = false;
        storage.save_workflow(&workflow).await.unwrap();

        let capability = TriggerCapability::granted("t-acme", "ops@acme.test");
        let err = dispatcher
            .dispatch_manual(&workflow.id, json!({}), &capability)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_manual_dispatch_is_tenant_scoped() {
        let (storage, dispatcher, _) = dispatcher();
        let workflow = notify_workflow("t-acme", "private", Trigger::Manual);
        storage.save_workflow(&workflow).await.unwrap();

        // A capability for a different tenant cannot see the workflow.
        let outsider = TriggerCapability::granted("t-rival", "spy@rival.test");
        let err = dispatcher
            .dispatch_manual(&workflow.id, json!({}), &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));

        let missing = dispatcher
            .dispatch_manual(
                "no-such-id",
                json!({}),
                &TriggerCapability::granted("t-acme", "ops@acme.test"),
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::Workflow(_)));
    }

    #[tokio::test]
    async fn test_event_fans_out_to_matching_workflows_only() {
        let (storage, dispatcher, _) = dispatcher();

        let listener_a = notify_workflow(
            "t-acme",
            "lead-alert",
            Trigger::Event {
                event: "lead_created".to_string(),
            },
        );
        let listener_b = notify_workflow(
            "t-acme",
            "lead-scoring",
            Trigger::Event {
                event: "lead_created".to_string(),
            },
        );
        let mut inactive = notify_workflow(
            "t-acme",
            "lead-archived-flow",
            Trigger::Event {
                event: "lead_created".to_string(),
            },
        );
        inactive.active = false;
        let other_event = notify_workflow(
            "t-acme",
            "deal-alert",
            Trigger::Event {
                event: "deal_closed".to_string(),
            },
        );
        let other_tenant = notify_workflow(
            "t-rival",
            "lead-alert",
            Trigger::Event {
                event: "lead_created".to_string(),
            },
        );
        for w in [&listener_a, &listener_b, &inactive, &other_event, &other_tenant] {
            storage.save_workflow(w).await.unwrap();
        }

        let payload = json!({"id": "lead-9", "plan": "pro"});
        let message = EventMessage::new("t-acme", "lead_created", payload.clone());
        let admitted = dispatcher.on_event(&message).await.unwrap();

        assert_eq!(admitted.len(), 2);
        assert_ne!(admitted[0], admitted[1]);

        // Independent executions, identical payload snapshots.
        for id in &admitted {
            let execution = storage.get_execution(id).await.unwrap().unwrap();
            assert_eq!(execution.payload, payload);
            assert_eq!(execution.triggered_by.kind(), "event");
        }

        for id in &admitted {
            wait_terminal(&storage, id).await;
        }
    }

    #[tokio::test]
    async fn test_event_with_no_listeners_admits_nothing() {
        let (_, dispatcher, _) = dispatcher();
        let message = EventMessage::new("t-acme", "nothing_cares", json!({}));
        assert!(dispatcher.on_event(&message).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_due_ness_follows_interval() {
        let (storage, dispatcher, _) = dispatcher();
        let workflow = notify_workflow(
            "t-acme",
            "quarter-hourly",
            Trigger::Schedule { every_minutes: 15 },
        );
        storage.save_workflow(&workflow).await.unwrap();

        // No prior admission: due immediately.
        let first = dispatcher.on_schedule(Utc::now()).await.unwrap();
        assert_eq!(first.len(), 1);
        wait_terminal(&storage, &first[0]).await;

        // Interval not yet elapsed: nothing admitted.
        let again = dispatcher.on_schedule(Utc::now()).await.unwrap();
        assert!(again.is_empty());

        // Once the interval has passed, the workflow is due again.
        let later = Utc::now() + Duration::minutes(16);
        let second = dispatcher.on_schedule(later).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(second[0], first[0]);
        wait_terminal(&storage, &second[0]).await;
    }

    #[tokio::test]
    async fn test_recover_pending_redispatches_unclaimed_rows() {
        let (storage, dispatcher, sender) = dispatcher();
        let workflow = notify_workflow("t-acme", "restartable", Trigger::Manual);
        storage.save_workflow(&workflow).await.unwrap();

        // Admissions from a previous process that never got claimed.
        let orphan_a = Execution::admitted(
            &workflow,
            TriggeredBy::Manual {
                actor: "ops@acme.test".to_string(),
            },
            json!({}),
        );
        let orphan_b = Execution::admitted(
            &workflow,
            TriggeredBy::Manual {
                actor: "ops@acme.test".to_string(),
            },
            json!({}),
        );
        storage.save_execution(&orphan_a).await.unwrap();
        storage.save_execution(&orphan_b).await.unwrap();

        let recovered = dispatcher.recover_pending().await.unwrap();
        assert_eq!(recovered, 2);

        assert_eq!(
            wait_terminal(&storage, &orphan_a.id).await.status,
            ExecutionStatus::Completed
        );
        assert_eq!(
            wait_terminal(&storage, &orphan_b.id).await.status,
            ExecutionStatus::Completed
        );
        assert_eq!(sender.sent.lock().unwrap().len(), 2);

        assert_eq!(dispatcher.recover_pending().await.unwrap(), 0);
    }
}
