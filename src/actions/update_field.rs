//! Update-field action.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::providers::FieldUpdater;
use super::types::{Action, ActionContext, ActionOutcome};
use crate::condition::lookup;
use crate::error::{Error, Result};
use crate::workflow::ActionParams;

/// Sets one field on a CRM record identified by the trigger payload.
pub struct UpdateFieldAction {
    updater: Arc<dyn FieldUpdater>,
}

impl UpdateFieldAction {
    pub fn new(updater: Arc<dyn FieldUpdater>) -> Self {
        Self { updater }
    }
}

/// The record id may arrive as a string or a number; anything else is
/// ambiguous and fails the action.
fn record_id_from(payload: &Value, record_id_field: &str) -> Result<String> {
    let value = lookup(payload, record_id_field).ok_or_else(|| {
        Error::InvalidParameters(format!(
            "Trigger payload has no record id at '{}'",
            record_id_field
        ))
    })?;

    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::InvalidParameters(format!(
            "Record id at '{}' must be a string or number",
            record_id_field
        ))),
    }
}

#[async_trait]
impl Action for UpdateFieldAction {
    fn action_type(&self) -> &str {
        "update_field"
    }

    fn description(&self) -> &str {
        "Set a field on the CRM record referenced by the trigger payload"
    }

    async fn execute(&self, params: &ActionParams, ctx: &ActionContext) -> Result<ActionOutcome> {
        let (entity, record_id_field, field, value) = match params {
            ActionParams::UpdateField {
                entity,
                record_id_field,
                field,
                value,
            } => (entity, record_id_field, field, value),
            other => {
                return Err(Error::InvalidParameters(format!(
                    "update_field action received {} parameters",
                    other.kind()
                )))
            }
        };

        let record_id = record_id_from(&ctx.payload, record_id_field)?;

        debug!(
            execution_id = %ctx.execution_id,
            entity = %entity,
            record_id = %record_id,
            field = %field,
            "Updating record field"
        );

        let receipt = self
            .updater
            .update(
                &ctx.tenant_id,
                entity,
                &record_id,
                field,
                value,
                &ctx.idempotency_key(),
            )
            .await?;

        Ok(ActionOutcome::new(json!({
            "entity": entity,
            "record_id": record_id,
            "field": field,
            "receipt": receipt,
        })))
    }
}
