//! Execution engine for workflows.

mod cancel;
mod runner;

pub use cancel::CancelRegistry;
pub use runner::{
    Engine, STATUS_DETAIL_CONDITION_NOT_MATCHED, STATUS_DETAIL_DEADLINE_EXCEEDED,
    STATUS_DETAIL_SHUTDOWN, STATUS_DETAIL_WORKFLOW_MISSING,
};
