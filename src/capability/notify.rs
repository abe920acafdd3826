//! Developer notification backends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{Notification, Notifier};
use crate::config::{NotificationSettings, NotifierKind};
use crate::errors::CapabilityError;

const MAX_LISTED_FILES: usize = 10;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// First ten files, then a count of the rest.
fn file_lines(files: &[String]) -> Vec<String> {
    let mut lines: Vec<String> = files
        .iter()
        .take(MAX_LISTED_FILES)
        .map(|f| format!("- {f}"))
        .collect();
    if files.len() > MAX_LISTED_FILES {
        lines.push(format!("... and {} more", files.len() - MAX_LISTED_FILES));
    }
    lines
}

/// Prints a framed message to stdout.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn render(notification: &Notification) -> Vec<String> {
        let separator = "=".repeat(50);
        let mut lines = vec![
            separator.clone(),
            format!(
                "{} Stage '{}' requires attention",
                style("NOTIFICATION:").yellow().bold(),
                notification.stage
            ),
            format!("Message: {}", notification.message),
            format!("Files changed: {}", notification.files_changed.len()),
        ];
        lines.extend(file_lines(&notification.files_changed).into_iter().map(|l| format!("  {l}")));
        if let Some(ref url) = notification.diff_url {
            lines.push(format!("View diff: {}", style(url).cyan()));
        }
        lines.push(separator);
        lines
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError> {
        println!();
        for line in Self::render(notification) {
            println!("{line}");
        }
        println!();
        info!(stage = %notification.stage, "Console notification sent");
        Ok(true)
    }

    fn name(&self) -> String {
        "console".to_string()
    }
}

/// Emits the notification as a log event only.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError> {
        info!(
            stage = %notification.stage,
            files_changed = notification.files_changed.len(),
            "Notification: {}",
            notification.message
        );
        Ok(true)
    }

    fn name(&self) -> String {
        "logging".to_string()
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    payload: &Value,
    headers: &HashMap<String, String>,
) -> Result<bool, CapabilityError> {
    let mut request = client.post(url).timeout(HTTP_TIMEOUT).json(payload);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| CapabilityError::Network(e.to_string()))?;

    if response.status().is_success() {
        Ok(true)
    } else {
        error!(status = %response.status(), url, "Notification endpoint rejected payload");
        Ok(false)
    }
}

/// Slack incoming-webhook notifier using block kit.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
    channel: Option<String>,
    username: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: Option<String>, username: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            channel,
            username,
        }
    }

    pub fn payload(&self, notification: &Notification) -> Value {
        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("Stage '{}' requires attention", notification.stage),
                },
            }),
            json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": notification.message },
            }),
        ];

        if !notification.files_changed.is_empty() {
            let files = file_lines(&notification.files_changed).join("\n");
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Files changed:*\n```{files}```") },
            }));
        }

        if let Some(ref url) = notification.diff_url {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("<{url}|View Diff>") },
            }));
        }

        let mut payload = json!({ "username": self.username, "blocks": blocks });
        if let Some(ref channel) = self.channel {
            payload["channel"] = json!(channel);
        }
        payload
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError> {
        let sent = post_json(
            &self.client,
            &self.webhook_url,
            &self.payload(notification),
            &HashMap::new(),
        )
        .await?;
        if sent {
            info!(stage = %notification.stage, "Slack notification sent");
        }
        Ok(sent)
    }

    fn name(&self) -> String {
        "slack".to_string()
    }
}

/// POSTs the notification as JSON to an arbitrary endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            headers,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError> {
        let payload = serde_json::to_value(notification)
            .map_err(|e| CapabilityError::Invalid(e.to_string()))?;
        let sent = post_json(&self.client, &self.url, &payload, &self.headers).await?;
        if sent {
            info!(stage = %notification.stage, "Webhook notification sent");
        }
        Ok(sent)
    }

    fn name(&self) -> String {
        "webhook".to_string()
    }
}

/// Fans a notification out to several backends; succeeds if any does.
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError> {
        let mut any = false;
        for notifier in &self.notifiers {
            match notifier.send(notification).await {
                Ok(sent) => {
                    debug!(notifier = %notifier.name(), sent, "Notification attempt");
                    any |= sent;
                }
                Err(e) => error!(notifier = %notifier.name(), "Notification failed: {}", e),
            }
        }
        Ok(any)
    }

    fn name(&self) -> String {
        let names: Vec<String> = self.notifiers.iter().map(|n| n.name()).collect();
        format!("composite({})", names.join(", "))
    }
}

fn build_one(kind: NotifierKind, settings: &NotificationSettings) -> Result<Arc<dyn Notifier>> {
    Ok(match kind {
        NotifierKind::Console => Arc::new(ConsoleNotifier),
        NotifierKind::Logging => Arc::new(LoggingNotifier),
        NotifierKind::Slack => {
            let url = settings
                .slack_webhook_url
                .clone()
                .context("Slack notifications require notification.slack_webhook_url")?;
            Arc::new(SlackNotifier::new(
                url,
                settings.slack_channel.clone(),
                settings.slack_username.clone(),
            ))
        }
        NotifierKind::Webhook => {
            let url = settings
                .webhook_url
                .clone()
                .context("Webhook notifications require notification.webhook_url")?;
            Arc::new(WebhookNotifier::new(url, settings.webhook_headers.clone()))
        }
    })
}

/// Build the notifier described by `settings`. Several channels produce a
/// composite; none falls back to the console.
pub fn build_notifier(settings: &NotificationSettings) -> Result<Arc<dyn Notifier>> {
    let mut notifiers = settings
        .channels
        .iter()
        .map(|kind| build_one(*kind, settings))
        .collect::<Result<Vec<_>>>()?;

    Ok(match notifiers.len() {
        0 => Arc::new(ConsoleNotifier),
        1 => notifiers.remove(0),
        _ => Arc::new(CompositeNotifier::new(notifiers)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(files: usize) -> Notification {
        Notification {
            stage: "api_integration".into(),
            message: "Review required".into(),
            files_changed: (0..files).map(|i| format!("src/f{i}.rs")).collect(),
            diff_url: Some("http://diff".into()),
        }
    }

    struct Fixed(Result<bool, CapabilityError>);

    #[async_trait]
    impl Notifier for Fixed {
        async fn send(&self, _: &Notification) -> Result<bool, CapabilityError> {
            self.0.clone()
        }

        fn name(&self) -> String {
            "fixed".into()
        }
    }

    #[test]
    fn test_file_list_truncates_after_ten() {
        let lines = file_lines(&notification(13).files_changed);
        assert_eq!(lines.len(), 11);
        assert_eq!(lines.last().unwrap(), "... and 3 more");
    }

    #[test]
    fn test_console_render_includes_diff_url() {
        let lines = ConsoleNotifier::render(&notification(2));
        assert!(lines.iter().any(|l| l.contains("Files changed: 2")));
        assert!(lines.iter().any(|l| l.contains("http://diff")));
    }

    #[test]
    fn test_slack_payload_blocks() {
        let slack = SlackNotifier::new("http://hook".into(), Some("#dev".into()), "devflow".into());
        let payload = slack.payload(&notification(1));
        assert_eq!(payload["channel"], "#dev");
        assert_eq!(payload["username"], "devflow");
        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0]["type"], "header");
    }

    #[tokio::test]
    async fn test_composite_true_if_any_succeeds() {
        let composite = CompositeNotifier::new(vec![
            Arc::new(Fixed(Err(CapabilityError::Network("down".into())))),
            Arc::new(Fixed(Ok(true))),
        ]);
        assert!(composite.send(&notification(0)).await.unwrap());

        let all_fail = CompositeNotifier::new(vec![Arc::new(Fixed(Ok(false)))]);
        assert!(!all_fail.send(&notification(0)).await.unwrap());
    }

    #[test]
    fn test_build_notifier_variants() {
        let settings = NotificationSettings::default();
        assert_eq!(build_notifier(&settings).unwrap().name(), "console");

        let settings = NotificationSettings {
            channels: vec![NotifierKind::Console, NotifierKind::Logging],
            ..Default::default()
        };
        assert_eq!(
            build_notifier(&settings).unwrap().name(),
            "composite(console, logging)"
        );
    }

    #[test]
    fn test_build_slack_requires_url() {
        let settings = NotificationSettings {
            channels: vec![NotifierKind::Slack],
            ..Default::default()
        };
        assert!(build_notifier(&settings).is_err());
    }
}
