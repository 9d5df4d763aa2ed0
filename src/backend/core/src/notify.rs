//! Lifecycle notifications.
//!
//! Jobs report coarse lifecycle transitions to external collaborators.
//! Dispatch is fire-and-forget: a notification failure is logged and
//! never affects the job outcome.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::{NotificationsConfig, ToolsConfig};

/// Lifecycle transition kinds worth telling the outside world about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Started,
    Resumed,
    Completed,
    Failed,
    Stopped,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "STARTED"),
            Self::Resumed => write!(f, "RESUMED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Payload delivered to every dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub status: String,
    pub component: String,
    pub version: String,
    pub message: String,
    pub timestamp: String,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, component: &str, version: &str, message: impl Into<String>) -> Self {
        Self {
            status: kind.to_string(),
            component: component.to_string(),
            version: version.to_string(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Subject line for email-style dispatchers.
    pub fn subject(&self) -> String {
        format!(
            "Mirror job {}: {} v{}",
            self.status, self.component, self.version
        )
    }
}

/// Consumer of job lifecycle events.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &JobEvent);
}

/// Dispatcher used when nothing is configured.
pub struct NoopDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopDispatcher {
    async fn dispatch(&self, _event: &JobEvent) {}
}

/// POSTs the event as JSON to a configured webhook.
pub struct WebhookDispatcher {
    url: String,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn dispatch(&self, event: &JobEvent) {
        match self.client.post(&self.url).json(event).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(status = %event.status, "webhook notification sent");
            }
            Ok(resp) => {
                tracing::warn!(code = %resp.status(), "webhook notification rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to send webhook notification");
            }
        }
    }
}

/// Pipes the event message to the system mail command.
pub struct EmailDispatcher {
    mail_cmd: String,
    to: String,
}

impl EmailDispatcher {
    pub fn new(mail_cmd: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            mail_cmd: mail_cmd.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for EmailDispatcher {
    async fn dispatch(&self, event: &JobEvent) {
        let spawned = tokio::process::Command::new(&self.mail_cmd)
            .arg("-s")
            .arg(event.subject())
            .arg(&self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn mail command");
                return;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(event.message.as_bytes()).await;
        }
        match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!("email notification sent");
            }
            Ok(Ok(status)) => {
                tracing::warn!(code = ?status.code(), "mail command failed");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "mail command error"),
            Err(_) => tracing::warn!("mail command timed out"),
        }
    }
}

/// Fans one event out to every configured dispatcher.
pub struct CompositeDispatcher {
    dispatchers: Vec<Arc<dyn NotificationDispatcher>>,
}

impl CompositeDispatcher {
    pub fn new(dispatchers: Vec<Arc<dyn NotificationDispatcher>>) -> Self {
        Self { dispatchers }
    }
}

#[async_trait]
impl NotificationDispatcher for CompositeDispatcher {
    async fn dispatch(&self, event: &JobEvent) {
        for dispatcher in &self.dispatchers {
            dispatcher.dispatch(event).await;
        }
    }
}

/// Build the dispatcher stack from configuration.
pub fn from_config(
    notifications: &NotificationsConfig,
    tools: &ToolsConfig,
) -> Arc<dyn NotificationDispatcher> {
    let mut dispatchers: Vec<Arc<dyn NotificationDispatcher>> = Vec::new();
    if let Some(url) = &notifications.webhook_url {
        dispatchers.push(Arc::new(WebhookDispatcher::new(url)));
    }
    if let Some(email) = &notifications.email {
        dispatchers.push(Arc::new(EmailDispatcher::new(&tools.mail_cmd, email)));
    }
    match dispatchers.len() {
        0 => Arc::new(NoopDispatcher),
        1 => dispatchers.pop().unwrap_or(Arc::new(NoopDispatcher)),
        _ => Arc::new(CompositeDispatcher::new(dispatchers)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingDispatcher {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn dispatch(&self, event: &JobEvent) {
            self.seen.lock().push(event.status.clone());
        }
    }

    #[test]
    fn test_event_payload_shape() {
        let event = JobEvent::new(
            JobEventKind::Completed,
            "platform-navigator",
            "7.3.2",
            "download completed",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["component"], "platform-navigator");
        assert_eq!(json["version"], "7.3.2");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_subject_line() {
        let event = JobEvent::new(JobEventKind::Failed, "mq", "9.3.5", "boom");
        assert_eq!(event.subject(), "Mirror job FAILED: mq v9.3.5");
    }

    #[tokio::test]
    async fn test_composite_fans_out() {
        let a = Arc::new(RecordingDispatcher { seen: Mutex::new(vec![]) });
        let b = Arc::new(RecordingDispatcher { seen: Mutex::new(vec![]) });
        let composite = CompositeDispatcher::new(vec![a.clone(), b.clone()]);

        let event = JobEvent::new(JobEventKind::Started, "mq", "9.3.5", "started");
        composite.dispatch(&event).await;

        assert_eq!(a.seen.lock().as_slice(), ["STARTED"]);
        assert_eq!(b.seen.lock().as_slice(), ["STARTED"]);
    }

    #[test]
    fn test_from_config_defaults_to_noop() {
        let dispatcher = from_config(&NotificationsConfig::default(), &ToolsConfig::default());
        // Dispatching to a noop must be a no-op; mostly we assert it builds.
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(dispatcher.dispatch(&JobEvent::new(
            JobEventKind::Started,
            "c",
            "1.0",
            "m",
        )));
    }
}
