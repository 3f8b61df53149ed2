//! Post-commit notification dispatch.
//!
//! Alert creation and incident filing want authorities and emergency
//! contacts told about them, but a slow or failing provider must never
//! delay the write that triggered it. So dispatch is a post-commit hook:
//! the caller enqueues onto an unbounded channel after its store write
//! commits, and a spawned worker drains the queue and hands each
//! notification to the configured dispatcher. Enqueueing never blocks and
//! never fails the caller; dispatch failures are logged and dropped. The
//! core never awaits a delivery guarantee.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

/// One outbound notification: who to reach, over what, saying what.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub channel: Channel,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Fire-and-forget delivery seam. Implementations talk to whatever relay
/// the deployment uses; the engine only ever sees `Ok`/`Err` after the
/// fact, on the worker task.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default dispatcher: writes the notification to the log. Useful in
/// development and as the fallback when no relay is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            channel = ?notification.channel,
            recipients = notification.recipients.len(),
            subject = %notification.subject,
            "Notification dispatched (log only)"
        );
        Ok(())
    }
}

/// Dispatcher that POSTs each notification as JSON to a relay endpoint
/// (the deployment's SMS/email gateway).
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    relay_url: String,
}

impl WebhookDispatcher {
    pub fn new(relay_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: relay_url.to_string(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(notification)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// Sending half of the outbox. Cheap to clone; held in the application
/// state and by anything that commits a notifying write.
#[derive(Clone)]
pub struct NotificationOutbox {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationOutbox {
    /// Spawn the drain worker and return the sending half.
    pub fn spawn(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();

        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = dispatcher.notify(&notification).await {
                    warn!(
                        channel = ?notification.channel,
                        subject = %notification.subject,
                        error = %e,
                        "Notification dispatch failed; dropping"
                    );
                }
            }
        });

        Self { tx }
    }

    /// Queue a notification. Never blocks, never errors: if the worker is
    /// gone (shutdown), the notification is logged and dropped.
    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            warn!(
                subject = %e.0.subject,
                "Notification outbox closed; dropping"
            );
        }
    }
}
