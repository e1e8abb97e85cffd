//! Fan-out delivery to N outbound adapters with partial-failure tolerance,
//! plus per-question reminder timers.
//!
//! Grounded on the teacher's `workflow::notify` module (`NotificationChannel`
//! trait, `TelegramChannel`/`SlackChannel`/`LogChannel`/`DesktopChannel`,
//! `create_channels`) generalized from "one gate, one timeout" to parallel
//! fan-out across every adapter plus a re-firing, replaceable reminder per
//! question — the teacher's gate has no reminder concept.

mod channels;

pub use channels::{DesktopChannel, LogChannel, SlackChannel, TelegramChannel, WebhookChannel};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::Question;
use crate::Result;

const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Question,
    Progress,
    Error,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The payload shape every adapter translates into its own wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub respond_url: Option<String>,
    pub options: Option<Vec<String>>,
    pub phase: Option<u32>,
    pub step: Option<String>,
    pub summary: Option<String>,
    pub next_steps: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(id: impl Into<String>, kind: NotificationType, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            severity: Severity::Info,
            respond_url: None,
            options: None,
            phase: None,
            step: None,
            summary: None,
            next_steps: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_respond_url(mut self, url: impl Into<String>) -> Self {
        self.respond_url = Some(url.into());
        self
    }
}

/// A pluggable outbound notification channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at startup. A rejection demotes the adapter — it is
    /// removed and initialization continues (never kills startup).
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> Result<()>;

    /// Called once at shutdown, in parallel with every other adapter.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the outbound notification for a broker-raised question: title and
/// body from the first/all items' header and prompt, options flattened
/// across every item so a multi-item batch still surfaces every choice.
pub fn question_notification(question: &Question) -> Notification {
    let title = question
        .items
        .first()
        .and_then(|i| i.header.clone())
        .unwrap_or_else(|| "Pending question".to_string());
    let body = question
        .items
        .iter()
        .map(|i| i.prompt.clone())
        .collect::<Vec<_>>()
        .join("; ");
    let options: Vec<String> = question
        .items
        .iter()
        .flat_map(|i| i.options.iter().map(|o| o.label.clone()))
        .collect();

    let mut notification = Notification::new(question.id.clone(), NotificationType::Question, title, body)
        .with_severity(Severity::Info);
    if !options.is_empty() {
        notification = notification.with_options(options);
    }
    notification.phase = Some(question.phase);
    notification.step = Some(format!("{:?}", question.step));
    notification
}

struct ReminderEntry {
    handle: JoinHandle<()>,
}

/// Owns the adapter list and reminder timers. All dispatch is best-effort:
/// `notify` never returns an error, it only logs.
pub struct NotificationManager {
    channels: Mutex<Vec<Arc<dyn NotificationChannel>>>,
    reminders: Mutex<HashMap<String, ReminderEntry>>,
    reminder_interval: Duration,
}

impl NotificationManager {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self {
            channels: Mutex::new(channels.into_iter().map(Arc::from).collect()),
            reminders: Mutex::new(HashMap::new()),
            reminder_interval: DEFAULT_REMINDER_INTERVAL,
        }
    }

    pub fn with_reminder_interval(mut self, interval: Duration) -> Self {
        self.reminder_interval = interval;
        self
    }

    /// Initialize every adapter in parallel; drop any whose `init` rejects.
    pub async fn init(&self) {
        let channels = {
            let mut guard = self.channels.lock().expect("notify mutex poisoned");
            std::mem::take(&mut *guard)
        };

        let mut survivors = Vec::new();
        let results = futures::future::join_all(channels.into_iter().map(|c| async move {
            let result = c.init().await;
            (c, result)
        }))
        .await;

        for (channel, result) in results {
            match result {
                Ok(()) => survivors.push(channel),
                Err(e) => warn!("adapter {} failed to initialize, removing: {e}", channel.name()),
            }
        }

        *self.channels.lock().expect("notify mutex poisoned") = survivors;
    }

    /// Dispatch to every surviving adapter in parallel, waiting for all.
    /// Never propagates a failure: if every adapter fails (or none remain)
    /// the batch is logged as lost and dropped.
    pub async fn notify(&self, notification: &Notification) {
        // Clone the Arc list under a brief lock rather than taking it out of
        // the mutex, so a concurrent notify (e.g. a reminder firing mid-send)
        // never observes an empty channel list.
        let channels: Vec<Arc<dyn NotificationChannel>> = {
            let guard = self.channels.lock().expect("notify mutex poisoned");
            guard.clone()
        };

        if channels.is_empty() {
            warn!("no notification adapters registered, dropping {}", notification.id);
            return;
        }

        let results = futures::future::join_all(channels.iter().map(|c| c.send(notification))).await;

        let mut failures = 0;
        for (channel, result) in channels.iter().zip(results.iter()) {
            if let Err(e) = result {
                warn!("adapter {} failed to send {}: {e}", channel.name(), notification.id);
                failures += 1;
            }
        }
        if failures == channels.len() {
            warn!("all adapters failed, notification {} lost", notification.id);
        }
    }

    /// Schedule a one-shot reminder for `question_id` that re-dispatches
    /// `notification` after the reminder interval. Replacing an existing
    /// reminder for the same id cancels the previous timer.
    pub fn start_reminder(self: &std::sync::Arc<Self>, question_id: String, notification: Notification) {
        self.cancel_reminder(&question_id);

        let manager = self.clone();
        let interval = self.reminder_interval;
        let id_for_task = question_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            info!(question_id = %id_for_task, "reminder firing");
            manager.notify(&notification).await;
            manager.reminders.lock().expect("notify mutex poisoned").remove(&id_for_task);
        });

        self.reminders
            .lock()
            .expect("notify mutex poisoned")
            .insert(question_id, ReminderEntry { handle });
    }

    pub fn cancel_reminder(&self, question_id: &str) {
        if let Some(entry) = self.reminders.lock().expect("notify mutex poisoned").remove(question_id) {
            entry.handle.abort();
        }
    }

    /// Clear every pending reminder and close every adapter in parallel.
    pub async fn close(&self) {
        let reminders = std::mem::take(&mut *self.reminders.lock().expect("notify mutex poisoned"));
        for (_, entry) in reminders {
            entry.handle.abort();
        }

        let channels = std::mem::take(&mut *self.channels.lock().expect("notify mutex poisoned"));
        futures::future::join_all(channels.iter().map(|c| c.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingChannel {
        name: String,
        fail: bool,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _n: &Notification) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(crate::Error::Notification("boom".into()))
            } else {
                Ok(())
            }
        }

        async fn init(&self) -> Result<()> {
            if self.fail {
                Err(crate::Error::Notification("init failed".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn init_demotes_failing_adapters() {
        let good = Arc::new(AtomicUsize::new(0));
        let bad = Arc::new(AtomicUsize::new(0));
        let manager = NotificationManager::new(vec![
            Box::new(CountingChannel { name: "good".into(), fail: false, count: good.clone() }),
            Box::new(CountingChannel { name: "bad".into(), fail: true, count: bad.clone() }),
        ]);

        manager.init().await;
        assert_eq!(manager.channels.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notify_with_zero_adapters_does_not_panic() {
        let manager = NotificationManager::new(vec![]);
        let n = Notification::new("n1", NotificationType::Progress, "t", "b");
        manager.notify(&n).await;
    }

    #[tokio::test]
    async fn notify_survives_all_adapters_failing() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = NotificationManager::new(vec![Box::new(CountingChannel {
            name: "bad".into(),
            fail: true,
            count: count.clone(),
        })]);
        let n = Notification::new("n1", NotificationType::Error, "t", "b");
        manager.notify(&n).await;
        manager.notify(&n).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
