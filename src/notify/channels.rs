//! Concrete outbound adapters.
//!
//! Telegram/Slack/Log/Desktop are adapted from the teacher's
//! `workflow::notify` implementations of the same name. Webhook is new,
//! added for the `--webhook-url`/`GSD_WEBHOOK_URL` surface the teacher has
//! no equivalent of.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Notification, NotificationChannel};
use crate::{Error, Result};

fn resolve_env(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

fn format_telegram(n: &Notification) -> String {
    let mut msg = format!("🔔 *{}*\n\n{}\n", n.title, n.body);

    if let Some(steps) = &n.next_steps {
        msg.push_str(&format!("\n📎 Next: {steps}\n"));
    }
    if let Some(options) = &n.options {
        msg.push_str("\nReply with one of:\n");
        for opt in options {
            msg.push_str(&format!("• {opt}\n"));
        }
    }
    if let Some(url) = &n.respond_url {
        msg.push_str(&format!("\n{url}"));
    }

    msg
}

fn format_slack(n: &Notification) -> serde_json::Value {
    let mut blocks = vec![
        serde_json::json!({
            "type": "header",
            "text": { "type": "plain_text", "text": n.title }
        }),
        serde_json::json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": n.body }
        }),
    ];

    if let Some(options) = &n.options {
        blocks.push(serde_json::json!({
            "type": "actions",
            "elements": options.iter().map(|o| serde_json::json!({
                "type": "button",
                "text": { "type": "plain_text", "text": o },
                "value": o
            })).collect::<Vec<_>>()
        }));
    }

    serde_json::json!({ "blocks": blocks })
}

pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: resolve_env(&bot_token.into()),
            chat_id: resolve_env(&chat_id.into()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": format_telegram(notification),
                "parse_mode": "Markdown"
            }))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("telegram send failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("telegram error: {body}")));
        }

        info!("telegram notification sent");
        Ok(())
    }
}

pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: resolve_env(&webhook_url.into()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&format_slack(notification))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("slack send failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("slack error: {body}")));
        }

        info!("slack notification sent");
        Ok(())
    }
}

/// Generic JSON POST, for `--webhook-url`/`GSD_WEBHOOK_URL`. Posts the
/// notification payload verbatim.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("webhook send failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("webhook error: {body}")));
        }

        Ok(())
    }
}

pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!("📬 {}: {}", notification.title, notification.body);
        debug!("{:?}", notification.kind);
        Ok(())
    }
}

pub struct DesktopChannel;

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            let _ = tokio::process::Command::new("notify-send")
                .arg(&notification.title)
                .arg(&notification.body)
                .spawn();
        }

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                notification.body.replace('"', "'"),
                notification.title.replace('"', "'")
            );
            let _ = tokio::process::Command::new("osascript").arg("-e").arg(&script).spawn();
        }

        info!("desktop notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationType, Severity};

    #[test]
    fn telegram_formatting_includes_title_body_and_options() {
        let n = Notification::new("q1", NotificationType::Question, "Pick a DB", "Which database?")
            .with_options(vec!["Postgres".into(), "MySQL".into()])
            .with_severity(Severity::Info);
        let formatted = format_telegram(&n);
        assert!(formatted.contains("Pick a DB"));
        assert!(formatted.contains("Postgres"));
    }

    #[test]
    fn resolve_env_passes_through_plain_values() {
        assert_eq!(resolve_env("plain-token"), "plain-token");
    }
}
