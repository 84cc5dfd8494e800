//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::Workflow;

/// Execution status.
///
/// Transitions are monotonic: `pending -> running -> {completed, failed,
/// cancelled}`; a `pending` execution may also be cancelled directly. The
/// store enforces this with conditional updates, never in-process locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states have no outgoing transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(crate::error::Error::Validation(format!(
                "Unknown status: {}",
                s
            ))),
        }
    }
}

/// Outcome of one action within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLogStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for ActionLogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for ActionLogStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(crate::error::Error::Validation(format!(
                "Unknown action log status: {}",
                s
            ))),
        }
    }
}

/// What caused an execution, captured at admission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggeredBy {
    /// Explicit invocation; the actor is the authorized caller's identity
    Manual { actor: String },
    /// A domain event delivered through the event bus
    Event { event: String },
    /// The schedule tick
    Schedule,
}

impl TriggeredBy {
    /// Stable kind string, also the `trigger_kind` storage column.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggeredBy::Manual { .. } => "manual",
            TriggeredBy::Event { .. } => "event",
            TriggeredBy::Schedule => "schedule",
        }
    }
}

/// One run of one workflow against one trigger payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    /// Denormalized from the workflow for tenant-scoped queries
    pub tenant_id: String,
    pub status: ExecutionStatus,
    /// Qualifier for terminal states, e.g. "condition_not_matched"
    pub status_detail: Option<String>,
    pub triggered_by: TriggeredBy,
    /// Snapshot of the trigger payload, captured once and never mutated
    pub payload: serde_json::Value,
    /// Admission time (row creation), not claim time
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Build a fresh `pending` execution for a workflow admission.
    pub fn admitted(
        workflow: &Workflow,
        triggered_by: TriggeredBy,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            tenant_id: workflow.tenant_id.clone(),
            status: ExecutionStatus::Pending,
            status_detail: None,
            triggered_by,
            payload,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Audit record for one executed action.
///
/// Rows are immutable once written: the index and action type are captured
/// by value, so later edits to the workflow never rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub execution_id: String,
    /// 0-based position in the action list at the time of the run
    pub action_index: u32,
    pub action_type: String,
    pub status: ActionLogStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Stable code from the error taxonomy, when status is `failed`
    pub error_code: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Query filters for the execution audit surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionQuery {
    pub workflow_id: Option<String>,
    pub tenant_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub trigger_kind: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ExecutionQuery {
    fn default() -> Self {
        Self {
            workflow_id: None,
            tenant_id: None,
            status: None,
            trigger_kind: None,
            started_after: None,
            started_before: None,
            limit: 50,
            offset: 0,
        }
    }
}
