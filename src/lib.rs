//! flowline - tenant-scoped workflow automation engine
//!
//! flowline runs trigger-condition-action automations for a multi-tenant
//! CRM: a trigger (manual call, domain event, or schedule tick) admits an
//! execution, an optional condition gates it against the trigger payload,
//! and an ordered list of actions runs with a durable per-action audit
//! trail.
//!
//! ## Key properties
//!
//! - **At-most-once runs**: a conditional row update is the only claim
//!   primitive, so horizontally scaled workers never double-execute
//! - **Fail-fast audit trail**: one log row per executed action, written in
//!   index order before the next action starts; nothing past a failure
//! - **Typed definitions**: triggers, conditions, and action parameters are
//!   closed serde variants validated at save time
//! - **Cooperative control**: cancellation, shutdown, and deadlines take
//!   effect at action boundaries, never mid-side-effect
//!
//! ## Example definition (JSON)
//!
//! ```json
//! {
//!   "tenant_id": "t-acme",
//!   "name": "vip-lead-alert",
//!   "trigger": {"type": "event", "event": "lead_created"},
//!   "condition": {"op": "eq", "field": "plan", "value": "enterprise"},
//!   "actions": [
//!     {"params": {"type": "send_notification",
//!                 "recipient": "sales@acme.test",
//!                 "body": "enterprise lead arrived"}},
//!     {"params": {"type": "update_field", "entity": "lead",
//!                 "field": "stage", "value": "routed"}}
//!   ]
//! }
//! ```

pub mod actions;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod storage;
pub mod triggers;
pub mod workflow;

pub use error::{Error, Result};
