//! Workflow validation.
//!
//! Every write path (CLI, library callers) runs definitions through
//! [`validate_workflow`] before they reach storage, so the engine only ever
//! loads definitions that are structurally and semantically sound.

use super::types::{
    ActionParams, ActionSpec, Trigger, Workflow, MAX_DELAY_SECS, MAX_SCHEDULE_INTERVAL_MINUTES,
};
use crate::condition::{Condition, MAX_CONDITION_DEPTH};
use crate::error::{Error, Result};

/// Validate a workflow definition.
///
/// Checks for:
/// - Required fields (tenant, name) and name charset
/// - Trigger-specific constraints (event name, schedule interval bounds)
/// - Non-empty action list for active workflows
/// - Per-type action parameter constraints and timeout sanity
/// - Condition depth limit and well-formed field references
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    if workflow.tenant_id.is_empty() {
        return Err(Error::Validation("Workflow tenant is required".into()));
    }

    if workflow.name.is_empty() {
        return Err(Error::Validation("Workflow name is required".into()));
    }

    if !workflow
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(
            "Workflow name must contain only alphanumeric characters, hyphens, and underscores"
                .into(),
        ));
    }

    validate_trigger(&workflow.trigger)?;

    if workflow.active && workflow.actions.is_empty() {
        return Err(Error::Validation(
            "Active workflow must have at least one action".into(),
        ));
    }

    for (index, action) in workflow.actions.iter().enumerate() {
        validate_action(index, action)?;
    }

    if let Some(condition) = &workflow.condition {
        if condition.depth() > MAX_CONDITION_DEPTH {
            return Err(Error::Validation(format!(
                "Condition exceeds maximum depth of {}",
                MAX_CONDITION_DEPTH
            )));
        }
        validate_condition(condition)?;
    }

    Ok(())
}

fn validate_trigger(trigger: &Trigger) -> Result<()> {
    match trigger {
        Trigger::Manual => Ok(()),
        Trigger::Event { event } => {
            if event.is_empty() {
                return Err(Error::Validation("Event trigger requires an event name".into()));
            }
            if !event
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
            {
                return Err(Error::Validation(format!(
                    "Invalid event name '{}': use alphanumeric characters, hyphens, underscores, and dots",
                    event
                )));
            }
            Ok(())
        }
        Trigger::Schedule { every_minutes } => {
            if *every_minutes == 0 {
                return Err(Error::Validation(
                    "Schedule interval must be at least 1 minute".into(),
                ));
            }
            if *every_minutes > MAX_SCHEDULE_INTERVAL_MINUTES {
                return Err(Error::Validation(format!(
                    "Schedule interval must not exceed {} minutes",
                    MAX_SCHEDULE_INTERVAL_MINUTES
                )));
            }
            Ok(())
        }
    }
}

fn validate_action(index: usize, action: &ActionSpec) -> Result<()> {
    let kind = action.params.kind();

    if action.timeout_secs == Some(0) {
        return Err(Error::Validation(format!(
            "Action {} ({}): timeout must be at least 1 second",
            index, kind
        )));
    }

    match &action.params {
        ActionParams::SendNotification { recipient, body, .. } => {
            if recipient.is_empty() {
                return Err(Error::Validation(format!(
                    "Action {} ({}): recipient is required",
                    index, kind
                )));
            }
            if body.is_empty() {
                return Err(Error::Validation(format!(
                    "Action {} ({}): body is required",
                    index, kind
                )));
            }
        }
        ActionParams::UpdateField {
            entity,
            record_id_field,
            field,
            ..
        } => {
            if entity.is_empty() {
                return Err(Error::Validation(format!(
                    "Action {} ({}): entity is required",
                    index, kind
                )));
            }
            if field.is_empty() {
                return Err(Error::Validation(format!(
                    "Action {} ({}): field is required",
                    index, kind
                )));
            }
            if record_id_field.is_empty() {
                return Err(Error::Validation(format!(
                    "Action {} ({}): record_id_field cannot be empty",
                    index, kind
                )));
            }
        }
        ActionParams::Delay { seconds } => {
            if *seconds == 0 {
                return Err(Error::Validation(format!(
                    "Action {} ({}): delay must be at least 1 second",
                    index, kind
                )));
            }
            if *seconds > MAX_DELAY_SECS {
                return Err(Error::Validation(format!(
                    "Action {} ({}): delay must not exceed {} seconds",
                    index, kind, MAX_DELAY_SECS
                )));
            }
        }
        ActionParams::CallWebhook { url, .. } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Validation(format!(
                    "Action {} ({}): url must start with http:// or https://",
                    index, kind
                )));
            }
        }
    }

    Ok(())
}

fn validate_condition(condition: &Condition) -> Result<()> {
    match condition {
        Condition::Eq { field, .. }
        | Condition::Ne { field, .. }
        | Condition::Gt { field, .. }
        | Condition::Gte { field, .. }
        | Condition::Lt { field, .. }
        | Condition::Lte { field, .. } => {
            if field.is_empty() {
                return Err(Error::Validation("Condition field cannot be empty".into()));
            }
            Ok(())
        }
        Condition::In { field, values } => {
            if field.is_empty() {
                return Err(Error::Validation("Condition field cannot be empty".into()));
            }
            if values.is_empty() {
                return Err(Error::Validation(
                    "Membership condition requires at least one value".into(),
                ));
            }
            Ok(())
        }
        Condition::All { conditions } | Condition::Any { conditions } => {
            for condition in conditions {
                validate_condition(condition)?;
            }
            Ok(())
        }
        Condition::Not { condition } => validate_condition(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_workflow() -> Workflow {
        Workflow::new("t-acme", "lead-alert", Trigger::Manual).with_action(ActionSpec::new(
            ActionParams::SendNotification {
                recipient: "sales@acme.test".to_string(),
                subject: None,
                body: "new lead".to_string(),
            },
        ))
    }

    #[test]
    fn test_valid_workflow() {
        assert!(validate_workflow(&minimal_workflow()).is_ok());
    }

    #[test]
    fn test_empty_name() {
        let mut workflow = minimal_workflow();
        workflow.name = String::new();
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_invalid_name_charset() {
        let mut workflow = minimal_workflow();
        workflow.name = "my workflow!".to_string();
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_empty_tenant() {
        let mut workflow = minimal_workflow();
        workflow.tenant_id = String::new();
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_active_requires_actions() {
        let mut workflow = minimal_workflow();
        workflow.actions.clear();
        assert!(validate_workflow(&workflow).is_err());

        // An inactive draft may be stored without actions.
        workflow.active = false;
        assert!(validate_workflow(&workflow).is_ok());
    }

    #[test]
    fn test_event_trigger_name() {
        let mut workflow = minimal_workflow();
        workflow.trigger = Trigger::Event {
            event: String::new(),
        };
        assert!(validate_workflow(&workflow).is_err());

        workflow.trigger = Trigger::Event {
            event: "lead created!".to_string(),
        };
        assert!(validate_workflow(&workflow).is_err());

        workflow.trigger = Trigger::Event {
            event: "lead_created".to_string(),
        };
        assert!(validate_workflow(&workflow).is_ok());
    }

    #[test]
    fn test_schedule_interval_bounds() {
        let mut workflow = minimal_workflow();
        workflow.trigger = Trigger::Schedule { every_minutes: 0 };
        assert!(validate_workflow(&workflow).is_err());

        workflow.trigger = Trigger::Schedule {
            every_minutes: MAX_SCHEDULE_INTERVAL_MINUTES + 1,
        };
        assert!(validate_workflow(&workflow).is_err());

        workflow.trigger = Trigger::Schedule { every_minutes: 15 };
        assert!(validate_workflow(&workflow).is_ok());
    }

    #[test]
    fn test_delay_bounds() {
        let mut workflow = minimal_workflow();
        workflow.actions = vec![ActionSpec::new(ActionParams::Delay { seconds: 0 })];
        assert!(validate_workflow(&workflow).is_err());

        workflow.actions = vec![ActionSpec::new(ActionParams::Delay {
            seconds: MAX_DELAY_SECS + 1,
        })];
        assert!(validate_workflow(&workflow).is_err());

        workflow.actions = vec![ActionSpec::new(ActionParams::Delay {
            seconds: MAX_DELAY_SECS,
        })];
        assert!(validate_workflow(&workflow).is_ok());
    }

    #[test]
    fn test_webhook_url_scheme() {
        let mut workflow = minimal_workflow();
        workflow.actions = vec![ActionSpec::new(ActionParams::CallWebhook {
            url: "ftp://example.com/hook".to_string(),
            headers: Default::default(),
        })];
        let err = validate_workflow(&workflow).unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn test_notification_params() {
        let mut workflow = minimal_workflow();
        workflow.actions = vec![ActionSpec::new(ActionParams::SendNotification {
            recipient: String::new(),
            subject: None,
            body: "hi".to_string(),
        })];
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_update_field_params() {
        let mut workflow = minimal_workflow();
        workflow.actions = vec![ActionSpec::new(ActionParams::UpdateField {
            entity: "lead".to_string(),
            record_id_field: "id".to_string(),
            field: String::new(),
            value: json!("qualified"),
        })];
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut workflow = minimal_workflow();
        workflow.actions[0].timeout_secs = Some(0);
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_condition_depth_limit() {
        let mut condition = Condition::Eq {
            field: "status".to_string(),
            value: json!("open"),
        };
        for _ in 0..MAX_CONDITION_DEPTH {
            condition = Condition::Not {
                condition: Box::new(condition),
            };
        }

        let workflow = minimal_workflow().with_condition(condition);
        let err = validate_workflow(&workflow).unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_condition_empty_field() {
        let workflow = minimal_workflow().with_condition(Condition::All {
            conditions: vec![Condition::Eq {
                field: String::new(),
                value: json!(1),
            }],
        });
        assert!(validate_workflow(&workflow).is_err());
    }

    #[test]
    fn test_condition_empty_membership() {
        let workflow = minimal_workflow().with_condition(Condition::In {
            field: "plan".to_string(),
            values: vec![],
        });
        assert!(validate_workflow(&workflow).is_err());
    }
}
