//! Workflow type definitions.
//!
//! A workflow is a tenant-scoped automation: one trigger, an optional
//! condition, and an ordered list of actions. Definitions are stored as
//! typed JSON columns; every parameter shape is a closed serde variant so
//! malformed definitions are rejected at save time, not at run time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::condition::Condition;

/// Upper bound for a `delay` action, in seconds (24 hours).
pub const MAX_DELAY_SECS: u64 = 86_400;

/// Upper bound for a schedule interval, in minutes (7 days).
pub const MAX_SCHEDULE_INTERVAL_MINUTES: u32 = 10_080;

/// A complete workflow definition.
///
/// # Example definition (JSON)
///
/// ```json
/// {
///   "tenant_id": "t-acme",
///   "name": "vip-lead-alert",
///   "trigger": {"type": "event", "event": "lead_created"},
///   "condition": {"op": "eq", "field": "plan", "value": "enterprise"},
///   "actions": [
///     {
///       "name": "notify sales",
///       "params": {
///         "type": "send_notification",
///         "recipient": "sales@acme.test",
///         "body": "enterprise lead arrived"
///       }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier
    #[serde(default = "generate_id")]
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Display name, unique per tenant
    pub name: String,

    /// What starts this workflow
    pub trigger: Trigger,

    /// Gate evaluated against the trigger payload; absent means always run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    /// Ordered steps; array index is execution order
    pub actions: Vec<ActionSpec>,

    /// Inactive workflows are never admitted for execution
    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_active() -> bool {
    true
}

impl Workflow {
    /// Create a workflow with a fresh id and current timestamps.
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            trigger,
            condition: None,
            actions: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }
}

/// Workflow trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Explicit invocation by an authorized caller
    Manual,
    /// Fired by a named domain event (e.g. "lead_created")
    Event {
        /// Event name to listen for
        event: String,
    },
    /// Fired by the schedule tick when the interval has elapsed
    Schedule {
        /// Minimum minutes between admissions
        every_minutes: u32,
    },
}

impl Trigger {
    /// Stable kind string, also the `trigger_kind` storage column.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Event { .. } => "event",
            Trigger::Schedule { .. } => "schedule",
        }
    }

    /// Event name for event triggers.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Trigger::Event { event } => Some(event),
            _ => None,
        }
    }
}

/// One ordered step within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Optional display name for audit output
    #[serde(default)]
    pub name: Option<String>,

    /// Typed parameters; the variant tag is the action type
    pub params: ActionParams,

    /// Per-action timeout in seconds (overrides the configured default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ActionSpec {
    pub fn new(params: ActionParams) -> Self {
        Self {
            name: None,
            params,
            timeout_secs: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Typed parameters, one variant per action type.
///
/// The closed set replaces free-form parameter maps: a definition that
/// deserializes is structurally sound, and the validator only has to check
/// value-level constraints (bounds, URL shape, non-empty strings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionParams {
    /// Deliver a message through the tenant's notification provider.
    SendNotification {
        recipient: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        body: String,
    },
    /// Set one field on the record the trigger payload refers to.
    UpdateField {
        /// Record kind, e.g. "lead", "ticket"
        entity: String,
        /// Payload field holding the target record's id
        #[serde(default = "default_record_id_field")]
        record_id_field: String,
        field: String,
        value: serde_json::Value,
    },
    /// Suspend this execution for a bounded duration.
    Delay { seconds: u64 },
    /// POST the trigger payload to an external URL.
    CallWebhook {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

fn default_record_id_field() -> String {
    "id".to_string()
}

impl ActionParams {
    /// Stable action type string, used for registry dispatch and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionParams::SendNotification { .. } => "send_notification",
            ActionParams::UpdateField { .. } => "update_field",
            ActionParams::Delay { .. } => "delay",
            ActionParams::CallWebhook { .. } => "call_webhook",
        }
    }
}
