use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

/// Delivers a rendered push payload to one device or user token.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn push(&self, recipient: &str, payload: &str) -> Result<(), String>;
}

/// POSTs `{ "to": <recipient>, "payload": <json> }` to a webhook.
pub struct WebhookPushSender {
    client: Client,
    url: String,
}

impl WebhookPushSender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PushSender for WebhookPushSender {
    async fn push(&self, recipient: &str, payload: &str) -> Result<(), String> {
        let payload: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| format!("payload is not JSON: {e}"))?;
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "to": recipient, "payload": payload }))
            .send()
            .await
            .map_err(|e| format!("webhook request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(format!("webhook returned {}: {body}", status.as_u16()));
        }
        Ok(())
    }
}

/// Logs instead of delivering. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn push(&self, recipient: &str, payload: &str) -> Result<(), String> {
        tracing::info!(recipient, bytes = payload.len(), "push notification (log only)");
        Ok(())
    }
}
