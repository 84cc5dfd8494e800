//! Call-webhook action.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::types::{Action, ActionContext, ActionOutcome};
use crate::error::{Error, Result};
use crate::workflow::ActionParams;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// POSTs the trigger payload to a tenant-configured URL.
pub struct CallWebhookAction {
    client: Client,
    allow_private_hosts: bool,
}

impl CallWebhookAction {
    /// `allow_private_hosts` disables the internal-address guard; it exists
    /// for single-host development setups and should stay off in production.
    pub fn new(allow_private_hosts: bool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout defaults: {}", e);
                Client::new()
            });
        Self {
            client,
            allow_private_hosts,
        }
    }

    /// Reject URLs that would let one tenant's workflow reach the engine's
    /// own network: non-http(s) schemes, localhost, private ranges, and
    /// cloud metadata endpoints.
    fn check_url(&self, url: &str) -> Result<()> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Validation(format!("Invalid webhook URL '{}': {}", url, e)))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(Error::Validation(format!(
                    "Webhook URL scheme '{}' is not allowed; use http or https",
                    scheme
                )));
            }
        }

        if self.allow_private_hosts {
            return Ok(());
        }

        let host = match parsed.host_str() {
            Some(host) => host.to_lowercase(),
            None => return Err(Error::Validation(format!("Webhook URL '{}' has no host", url))),
        };

        let blocked = if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            is_internal_ip(&ip)
        } else {
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        };

        if blocked {
            warn!("Blocked webhook to internal address: {}", url);
            return Err(Error::Validation(
                "Webhook URLs must not point at internal or private addresses".to_string(),
            ));
        }

        Ok(())
    }
}

/// Loopback, private, link-local (including cloud metadata at 169.254.169.254),
/// CGNAT and unspecified addresses all count as internal.
fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6
                    .to_ipv4_mapped()
                    .map(|v4| is_internal_ip(&IpAddr::V4(v4)))
                    .unwrap_or(false)
        }
    }
}

#[async_trait]
impl Action for CallWebhookAction {
    fn action_type(&self) -> &str {
        "call_webhook"
    }

    fn description(&self) -> &str {
        "POST the trigger payload to an external URL"
    }

    async fn execute(&self, params: &ActionParams, ctx: &ActionContext) -> Result<ActionOutcome> {
        let (url, headers) = match params {
            ActionParams::CallWebhook { url, headers } => (url, headers),
            other => {
                return Err(Error::InvalidParameters(format!(
                    "call_webhook action received {} parameters",
                    other.kind()
                )))
            }
        };

        self.check_url(url)?;

        debug!(execution_id = %ctx.execution_id, url = %url, "Calling webhook");

        let mut request = self
            .client
            .post(url)
            .header("Idempotency-Key", ctx.idempotency_key())
            .json(&ctx.payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let start = std::time::Instant::now();
        let response = request.send().await?;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|e| {
            Error::Provider(format!(
                "Failed to read webhook response body from {}: {}",
                url, e
            ))
        })?;

        if status >= 400 {
            return Err(Error::Provider(format!(
                "Webhook POST {} returned {}: {}",
                url, status, body_text
            )));
        }

        info!(
            execution_id = %ctx.execution_id,
            url = %url,
            status,
            duration_ms = duration.as_millis() as u64,
            "Webhook delivered"
        );

        // Endpoints are not required to answer with JSON.
        let body: Value =
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        Ok(ActionOutcome::new(json!({
            "status": status,
            "body": body,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded() -> CallWebhookAction {
        CallWebhookAction::new(false)
    }

    #[test]
    fn test_blocks_localhost_and_loopback() {
        assert!(guarded().check_url("http://localhost:8080/hook").is_err());
        assert!(guarded().check_url("http://127.0.0.1:6379/hook").is_err());
        assert!(guarded().check_url("http://[::1]/hook").is_err());
    }

    #[test]
    fn test_blocks_private_ranges() {
        assert!(guarded().check_url("http://10.0.0.1/hook").is_err());
        assert!(guarded().check_url("http://192.168.1.1/hook").is_err());
        assert!(guarded().check_url("http://172.16.0.1/hook").is_err());
        assert!(guarded().check_url("http://100.64.0.1/hook").is_err());
    }

    #[test]
    fn test_blocks_metadata_and_internal_hosts() {
        assert!(guarded()
            .check_url("http://169.254.169.254/latest/meta-data/")
            .is_err());
        assert!(guarded().check_url("http://db.internal/hook").is_err());
        assert!(guarded().check_url("http://printer.local/hook").is_err());
    }

    #[test]
    fn test_blocks_non_http_schemes() {
        let err = guarded().check_url("file:///etc/passwd").unwrap_err();
        assert!(err.to_string().contains("scheme"));
        assert!(guarded().check_url("ftp://example.com/file").is_err());
    }

    #[test]
    fn test_allows_external_hosts() {
        assert!(guarded().check_url("https://hooks.example.com/abc").is_ok());
        assert!(guarded().check_url("http://api.example.com/v1").is_ok());
    }

    #[test]
    fn test_private_hosts_opt_in() {
        let open = CallWebhookAction::new(true);
        assert!(open.check_url("http://localhost:8080/hook").is_ok());
        // The scheme check is not negotiable.
        assert!(open.check_url("file:///etc/passwd").is_err());
    }
}
