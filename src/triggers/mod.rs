//! Trigger ingress.
//!
//! Triggers define what starts a workflow:
//! - Manual: an authorized caller invokes `dispatch_manual`
//! - Event: a domain event delivered through the event bus
//! - Schedule: the periodic tick admits workflows whose interval elapsed

mod bus;
mod dispatcher;
mod schedule;
mod subscriber;

pub use bus::{EventBus, EventMessage, EventReceiver, NativeEventBus, DEFAULT_EVENT_BUS_CAPACITY};
pub use dispatcher::{TriggerCapability, TriggerDispatcher};
pub use schedule::ScheduleTicker;
pub use subscriber::EventSubscriber;
