use std::time::Duration;

use argos_core::error::AppError;
use argos_core::notify::LogNotifier;
use argos_core::traits::{Notification, Notifier};
use reqwest::Client;
use url::Url;

use crate::ROBOTS_USER_AGENT;

/// POSTs each notification as JSON to a fixed endpoint.
///
/// Body: `{"event": "new_content" | "error", "siteId", "url", "contentHash" | "error"}`.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    endpoint: Url,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AppError::ConfigError(format!("invalid webhook URL '{endpoint}': {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "webhook URL scheme '{}' is not allowed (only http/https)",
                endpoint.scheme()
            )));
        }

        let client = Client::builder()
            .user_agent(ROBOTS_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ConfigError(format!("webhook client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(notification)
            .send()
            .await
            .map_err(|e| AppError::NetworkFetchFailed(format!("webhook delivery failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::NetworkFetchFailed(format!(
                "webhook returned HTTP {}",
                status.as_u16()
            )));
        }

        tracing::debug!(endpoint = %self.endpoint, "Webhook delivered");
        Ok(())
    }
}

/// Webhook delivery when an endpoint is configured, log-only otherwise.
#[derive(Clone)]
pub enum OutboundNotifier {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl OutboundNotifier {
    pub fn from_endpoint(endpoint: Option<&str>) -> Result<Self, AppError> {
        match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => Ok(Self::Webhook(WebhookNotifier::new(endpoint)?)),
            None => Ok(Self::Log(LogNotifier)),
        }
    }
}

impl Notifier for OutboundNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        match self {
            Self::Log(n) => n.notify(notification).await,
            Self::Webhook(n) => n.notify(notification).await,
        }
    }
}
