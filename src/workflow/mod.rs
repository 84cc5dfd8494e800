//! Workflow definition and validation.
//!
//! Workflows are tenant-scoped automations:
//! - Trigger: what starts the workflow (manual, event, schedule)
//! - Condition: optional predicate gating execution
//! - Actions: the ordered steps to execute, in array order

mod types;
mod validator;

pub use types::*;
pub use validator::validate_workflow;
