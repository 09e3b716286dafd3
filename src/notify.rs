//! Issue notifications.
//!
//! Delivery is best-effort: [`dispatch`] runs the send on a detached task
//! bounded by a timeout, logs the outcome, and never reports back to the
//! request that produced the issue.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::NotifyConfig;
use crate::models::IssueRecord;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, issue: &IssueRecord) -> Result<()>;
}

/// Slack webhook when one is configured, otherwise a no-op.
pub fn create_notifier(config: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    match config.resolved_webhook() {
        Some(url) => Ok(Arc::new(SlackNotifier::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(DisabledNotifier)),
    }
}

/// Slack mrkdwn rendering of an issue.
///
/// ```text
/// *{title}*  (Severity: {severity})
/// *Dev*
/// • task
/// ```
///
/// Roles without tasks are omitted.
pub fn format_message(issue: &IssueRecord) -> String {
    let mut lines = vec![format!("*{}*  (Severity: {})", issue.title, issue.severity)];
    for (role, tasks) in issue.tasks.by_role() {
        if tasks.is_empty() {
            continue;
        }
        lines.push(format!("*{}*", role));
        lines.extend(tasks.iter().map(|t| format!("• {}", t)));
    }
    lines.join("\n")
}

/// Send on a detached task. The handle is only useful to tests; callers may
/// drop it.
pub fn dispatch(
    notifier: Arc<dyn Notifier>,
    issue: IssueRecord,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, notifier.send(&issue)).await {
            Ok(Ok(())) => debug!(target: "notify", title = %issue.title, "notification sent"),
            Ok(Err(e)) => {
                warn!(target: "notify", error = %format!("{:#}", e), "notification failed")
            }
            Err(_) => warn!(target: "notify", timeout_secs = timeout.as_secs(), "notification timed out"),
        }
    })
}

pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _issue: &IssueRecord) -> Result<()> {
        Ok(())
    }
}

pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, issue: &IssueRecord) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": format_message(issue) }))
            .send()
            .await
            .context("Slack webhook request failed")?;

        if !resp.status().is_success() {
            bail!("Slack webhook returned status: {}", resp.status());
        }
        Ok(())
    }
}
