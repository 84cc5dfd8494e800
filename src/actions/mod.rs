//! Action executors.
//!
//! Each workflow action type has one executor implementing the [`Action`]
//! trait. Executors are independent of the engine and the store: they get
//! validated parameters plus an [`ActionContext`] and return a structured
//! outcome or a taxonomy error. Side effects leave the process only through
//! the provider traits in [`providers`].

mod delay;
mod notification;
mod registry;
mod types;
mod update_field;
mod webhook;

pub mod providers;

pub use delay::DelayAction;
pub use notification::SendNotificationAction;
pub use providers::{FieldUpdater, LogFieldUpdater, LogNotificationSender, NotificationSender};
pub use registry::ActionRegistry;
pub use types::{Action, ActionContext, ActionOutcome};
pub use update_field::UpdateFieldAction;
pub use webhook::CallWebhookAction;
