//! Send-notification action.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::providers::NotificationSender;
use super::types::{Action, ActionContext, ActionOutcome};
use crate::error::{Error, Result};
use crate::workflow::ActionParams;

/// Sends a message to a recipient through the configured channel.
pub struct SendNotificationAction {
    sender: Arc<dyn NotificationSender>,
}

impl SendNotificationAction {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Action for SendNotificationAction {
    fn action_type(&self) -> &str {
        "send_notification"
    }

    fn description(&self) -> &str {
        "Send a notification message to a recipient"
    }

    async fn execute(&self, params: &ActionParams, ctx: &ActionContext) -> Result<ActionOutcome> {
        let (recipient, subject, body) = match params {
            ActionParams::SendNotification {
                recipient,
                subject,
                body,
            } => (recipient, subject.as_deref(), body),
            other => {
                return Err(Error::InvalidParameters(format!(
                    "send_notification action received {} parameters",
                    other.kind()
                )))
            }
        };

        debug!(
            execution_id = %ctx.execution_id,
            recipient = %recipient,
            "Sending notification"
        );

        let receipt = self
            .sender
            .send(
                &ctx.tenant_id,
                recipient,
                subject,
                body,
                &ctx.idempotency_key(),
            )
            .await?;

        Ok(ActionOutcome::new(json!({
            "recipient": recipient,
            "receipt": receipt,
        })))
    }
}
