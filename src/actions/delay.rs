//! Delay action.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::types::{Action, ActionContext, ActionOutcome};
use crate::error::{Error, Result};
use crate::workflow::{ActionParams, MAX_DELAY_SECS};

/// Pauses the execution for a bounded number of seconds.
pub struct DelayAction;

impl DelayAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DelayAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for DelayAction {
    fn action_type(&self) -> &str {
        "delay"
    }

    fn description(&self) -> &str {
        "Pause the execution for a fixed number of seconds"
    }

    async fn execute(&self, params: &ActionParams, ctx: &ActionContext) -> Result<ActionOutcome> {
        let seconds = match params {
            ActionParams::Delay { seconds } => *seconds,
            other => {
                return Err(Error::InvalidParameters(format!(
                    "delay action received {} parameters",
                    other.kind()
                )))
            }
        };

        // The bound is checked at save time; re-check here so definitions
        // written before a limit change cannot stall a worker.
        if seconds == 0 || seconds > MAX_DELAY_SECS {
            return Err(Error::InvalidParameters(format!(
                "Delay of {}s is outside 1..={}s",
                seconds, MAX_DELAY_SECS
            )));
        }

        debug!(
            execution_id = %ctx.execution_id,
            seconds,
            "Delaying execution"
        );
        tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;

        Ok(ActionOutcome::new(json!({
            "waited_seconds": seconds,
        })))
    }
}
