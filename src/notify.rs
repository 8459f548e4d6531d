//! Push notifications to the mobile app.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::store::{Store, StoreError};

const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push service rejected the message: {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("could not load device tokens: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub sent: usize,
    pub failed: usize,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `title` / `body` to every registered device. Failures for
    /// individual tokens are counted, not returned.
    async fn send_notification(&self, title: &str, body: &str) -> Result<NotificationReport, NotifyError>;
}

// ---------------------------------------------------------------------------
// FCM
// ---------------------------------------------------------------------------

/// Firebase Cloud Messaging over the HTTP v1 API, one request per token.
///
/// The OAuth access token is supplied from outside; refreshing it is the
/// deployment's concern.
#[derive(Clone)]
pub struct FcmNotifier {
    http: Client,
    base_url: String,
    project_id: String,
    access_token: String,
    tokens: Arc<dyn Store>,
}

impl FcmNotifier {
    pub fn new(project_id: String, access_token: String, tokens: Arc<dyn Store>) -> Self {
        Self {
            http: Client::new(),
            base_url: FCM_BASE_URL.to_owned(),
            project_id,
            access_token,
            tokens,
        }
    }

    async fn send_one(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&fcm_message(token, title, body))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for FcmNotifier {
    async fn send_notification(&self, title: &str, body: &str) -> Result<NotificationReport, NotifyError> {
        let tokens = self.tokens.device_tokens().await?;
        if tokens.is_empty() {
            info!("No registered devices; notification not sent");
            return Ok(NotificationReport::default());
        }

        let mut report = NotificationReport::default();
        for token in &tokens {
            match self.send_one(token, title, body).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(error = %e, "Push notification to one device failed");
                    report.failed += 1;
                }
            }
        }

        info!(sent = report.sent, failed = report.failed, "Push notification fan-out finished");
        Ok(report)
    }
}

/// High-priority message with default sound on both Android and iOS.
fn fcm_message(token: &str, title: &str, body: &str) -> Value {
    json!({
        "message": {
            "token": token,
            "notification": { "title": title, "body": body },
            "android": {
                "priority": "high",
                "notification": { "sound": "default", "channel_id": "default" }
            },
            "apns": {
                "headers": { "apns-priority": "10" },
                "payload": {
                    "aps": {
                        "sound": "default",
                        "alert": { "title": title, "body": body }
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Log only
// ---------------------------------------------------------------------------

/// Used when push credentials are not configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(&self, title: &str, body: &str) -> Result<NotificationReport, NotifyError> {
        warn!(title = %title, body = %body, "Push notifications not configured; alert logged only");
        Ok(NotificationReport::default())
    }
}
