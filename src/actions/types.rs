//! Action trait and context types.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::workflow::ActionParams;

/// Result of a successful action execution.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Structured output recorded in the action log.
    pub output: Value,

    /// True when the executor decided the action did not apply. Logged as
    /// `skipped`; the execution continues with the next action. None of the
    /// built-in executors skip, but custom ones may.
    pub skipped: bool,
}

impl ActionOutcome {
    /// Create an outcome with the given output.
    pub fn new(output: Value) -> Self {
        Self {
            output,
            skipped: false,
        }
    }

    /// Create an outcome with no output.
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Create a skipped outcome.
    pub fn skipped(output: Value) -> Self {
        Self {
            output,
            skipped: true,
        }
    }
}

/// Context passed to an action during execution.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Tenant that owns the workflow
    pub tenant_id: String,

    /// Execution this action belongs to
    pub execution_id: String,

    /// Workflow being executed
    pub workflow_id: String,

    /// Position of this action in the workflow's action list
    pub action_index: u32,

    /// Trigger payload captured at admission
    pub payload: Value,
}

impl ActionContext {
    /// Create a new context.
    pub fn new(tenant_id: &str, execution_id: &str, action_index: u32) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            execution_id: execution_id.to_string(),
            workflow_id: String::new(),
            action_index,
            payload: Value::Null,
        }
    }

    /// Set the workflow id.
    pub fn with_workflow_id(mut self, workflow_id: &str) -> Self {
        self.workflow_id = workflow_id.to_string();
        self
    }

    /// Set the trigger payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Idempotency key for outbound side effects.
    ///
    /// Stable across re-delivery of the same action of the same execution,
    /// so providers can deduplicate if an ambiguous failure is ever retried
    /// out of band.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.execution_id, self.action_index)
    }
}

/// Trait that all action executors implement.
#[async_trait]
pub trait Action: Send + Sync {
    /// The action type this executor handles (e.g. "send_notification").
    fn action_type(&self) -> &str;

    /// Execute the action with its validated parameters.
    ///
    /// Implementations receive the full parameter enum and must reject a
    /// variant that does not belong to them; the registry routes by
    /// `params.kind()`, so a mismatch indicates a wiring bug.
    async fn execute(&self, params: &ActionParams, ctx: &ActionContext) -> Result<ActionOutcome>;

    /// Get a description of this action type.
    fn description(&self) -> &str {
        "A workflow action"
    }
}
