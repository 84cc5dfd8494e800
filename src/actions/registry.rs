//! Action registry - manages available action types.

use std::collections::HashMap;
use std::sync::Arc;

use super::delay::DelayAction;
use super::notification::SendNotificationAction;
use super::providers::{LogFieldUpdater, LogNotificationSender};
use super::types::{Action, ActionContext, ActionOutcome};
use super::update_field::UpdateFieldAction;
use super::webhook::CallWebhookAction;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::workflow::ActionParams;

/// Registry of available action types.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create a registry with the built-in actions.
    ///
    /// Notification and field-update actions get the logging providers;
    /// embedders with real delivery channels register their own executors
    /// over these defaults.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(SendNotificationAction::new(Arc::new(
            LogNotificationSender,
        ))));
        registry.register(Arc::new(UpdateFieldAction::new(Arc::new(LogFieldUpdater))));
        registry.register(Arc::new(DelayAction::new()));
        registry.register(Arc::new(CallWebhookAction::new(
            config.engine.allow_private_webhooks,
        )));

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action executor, replacing any previous one of the same type.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.action_type().to_string(), action);
    }

    /// Get an executor by action type.
    pub fn get(&self, action_type: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(action_type).cloned()
    }

    /// Check if an action type is registered.
    pub fn has(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// Execute the action the parameters call for.
    pub async fn execute(
        &self,
        params: &ActionParams,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome> {
        let action = self
            .get(params.kind())
            .ok_or_else(|| Error::UnsupportedAction(params.kind().to_string()))?;

        action.execute(params, ctx).await
    }

    /// List all registered action types.
    pub fn list(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    /// Get descriptions of all registered actions.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.actions
            .iter()
            .map(|(name, action)| (name.as_str(), action.description()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_default_actions() {
        let registry = ActionRegistry::with_defaults(&Config::default());

        assert!(registry.has("send_notification"));
        assert!(registry.has("update_field"));
        assert!(registry.has("delay"));
        assert!(registry.has("call_webhook"));
        assert!(!registry.has("launch_missiles"));

        let types = registry.list();
        assert_eq!(types.len(), 4);
    }

    #[tokio::test]
    async fn test_execute_routes_by_params_kind() {
        let registry = ActionRegistry::with_defaults(&Config::default());
        let ctx = ActionContext::new("t-acme", "exec-1", 0)
            .with_payload(json!({"id": "lead-1"}));

        let outcome = registry
            .execute(&ActionParams::Delay { seconds: 1 }, &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.output["waited_seconds"], 1);
    }

    #[tokio::test]
    async fn test_unregistered_action_is_unsupported() {
        let registry = ActionRegistry::empty();
        let ctx = ActionContext::new("t-acme", "exec-1", 0);

        let err = registry
            .execute(&ActionParams::Delay { seconds: 1 }, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ACTION");
        assert!(err.to_string().contains("delay"));
    }
}
