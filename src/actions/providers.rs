//! Provider seams for outbound side effects.
//!
//! Notification delivery and CRM record updates happen outside this crate.
//! The executors only talk to these traits; deployments plug in real
//! transports, and the logging implementations below keep single-binary
//! setups and demos working without any external service.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::error::Result;

/// Delivers notifications to a recipient on behalf of a tenant.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        tenant_id: &str,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
        idempotency_key: &str,
    ) -> Result<Value>;
}

/// Applies a field update to a CRM record on behalf of a tenant.
#[async_trait]
pub trait FieldUpdater: Send + Sync {
    async fn update(
        &self,
        tenant_id: &str,
        entity: &str,
        record_id: &str,
        field: &str,
        value: &Value,
        idempotency_key: &str,
    ) -> Result<Value>;
}

/// Notification sender that writes to the log instead of a real channel.
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(
        &self,
        tenant_id: &str,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
        idempotency_key: &str,
    ) -> Result<Value> {
        info!(
            tenant_id = %tenant_id,
            recipient = %recipient,
            subject = subject.unwrap_or(""),
            idempotency_key = %idempotency_key,
            body_len = body.len(),
            "Notification delivered to log sink"
        );
        Ok(json!({
            "channel": "log",
            "recipient": recipient,
        }))
    }
}

/// Field updater that records the intent in the log only.
pub struct LogFieldUpdater;

#[async_trait]
impl FieldUpdater for LogFieldUpdater {
    async fn update(
        &self,
        tenant_id: &str,
        entity: &str,
        record_id: &str,
        field: &str,
        value: &Value,
        idempotency_key: &str,
    ) -> Result<Value> {
        info!(
            tenant_id = %tenant_id,
            entity = %entity,
            record_id = %record_id,
            field = %field,
            idempotency_key = %idempotency_key,
            "Field update applied to log sink"
        );
        Ok(json!({
            "channel": "log",
            "entity": entity,
            "record_id": record_id,
            "field": field,
            "value": value,
        }))
    }
}
