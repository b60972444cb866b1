use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

/// Fire-and-forget sink for failures worth a human's attention.
///
/// `notify` must return promptly and never fail; delivery problems are logged and dropped.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, target: Option<&str>, error: &str);
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, target: Option<&str>, error: &str) {
        debug!(
            event = "notification_skipped",
            target = target.unwrap_or("batch"),
            error,
            "no notification sink configured"
        );
    }
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts Block Kit messages to a Slack incoming webhook from a detached task.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
    job: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            job: job.into(),
        }
    }

    /// Same webhook, different job label in the message header.
    pub fn for_job(&self, job: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            webhook_url: self.webhook_url.clone(),
            job: job.into(),
        }
    }

    pub async fn send(&self, target: Option<&str>, error: &str) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.webhook_url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&block_kit_payload(&self.job, target, error))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl NotificationSink for SlackNotifier {
    fn notify(&self, target: Option<&str>, error: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                event = "notification_dropped",
                reason = "no_runtime",
                "cannot post notification outside a tokio runtime"
            );
            return;
        };

        let notifier = self.clone();
        let target = target.map(str::to_string);
        let error = error.to_string();
        runtime.spawn(async move {
            if let Err(err) = notifier.send(target.as_deref(), &error).await {
                warn!(
                    event = "notification_failed",
                    target = target.as_deref().unwrap_or("batch"),
                    error = %err,
                    "failed to post slack notification"
                );
            }
        });
    }
}

/// Per-job notifier factory held by the service.
#[derive(Clone, Default)]
pub enum Notifiers {
    #[default]
    Disabled,
    Slack(SlackNotifier),
    /// One sink for every job; used by tests and embedders.
    Shared(Arc<dyn NotificationSink>),
}

impl Notifiers {
    pub fn from_webhook(webhook_url: Option<&str>) -> Self {
        match webhook_url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => Self::Slack(SlackNotifier::new(url, "sync")),
            None => Self::Disabled,
        }
    }

    pub fn for_job(&self, job: &str) -> Arc<dyn NotificationSink> {
        match self {
            Self::Disabled => Arc::new(NoopNotifier),
            Self::Slack(slack) => Arc::new(slack.for_job(job)),
            Self::Shared(sink) => Arc::clone(sink),
        }
    }
}

fn block_kit_payload(job: &str, target: Option<&str>, error: &str) -> Value {
    let (header, target_text) = match target {
        Some(target) => (
            format!("[Error] {job} sync failed"),
            format!("*Target:*\n`{target}`"),
        ),
        None => (
            format!("[Error] {job} batch failed"),
            "*Target:*\n`whole batch`".to_string(),
        ),
    };

    json!({
        "text": format!("{job} sync failure"),
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": header, "emoji": true }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": target_text },
                    { "type": "mrkdwn", "text": format!("*Job:*\n`{job}`") }
                ]
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Error:*\n```{error}```") }
            }
        ]
    })
}
