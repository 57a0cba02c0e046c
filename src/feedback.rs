//! User feedback channel
//!
//! Components publish short notifications here; presentation code
//! subscribes and displays them for their display duration.

use crate::config::FeedbackDurations;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// How prominent a notification is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A notification for the user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub message: String,
    pub severity: Severity,
    pub display_duration: Duration,
    pub issued_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(message: impl Into<String>, severity: Severity, display_duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            severity,
            display_duration,
            issued_at: Utc::now(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let duration = chrono::Duration::from_std(self.display_duration)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.issued_at + duration
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Broadcast surface for feedback events
pub struct FeedbackChannel {
    durations: FeedbackDurations,
    current: RwLock<Option<FeedbackEvent>>,
    event_tx: broadcast::Sender<FeedbackEvent>,
}

impl Default for FeedbackChannel {
    fn default() -> Self {
        Self::new(FeedbackDurations::default())
    }
}

impl FeedbackChannel {
    pub fn new(durations: FeedbackDurations) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            durations,
            current: RwLock::new(None),
            event_tx,
        }
    }

    /// Subscribe to feedback events
    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackEvent> {
        self.event_tx.subscribe()
    }

    fn default_duration(&self, severity: Severity) -> Duration {
        let ms = match severity {
            Severity::Info => self.durations.info_ms,
            Severity::Success => self.durations.success_ms,
            Severity::Warning => self.durations.warning_ms,
            Severity::Error => self.durations.error_ms,
        };
        Duration::from_millis(ms)
    }

    /// Publish with the default duration for `severity`
    pub fn publish(&self, message: impl Into<String>, severity: Severity) -> FeedbackEvent {
        let duration = self.default_duration(severity);
        self.publish_for(message, severity, duration)
    }

    pub fn publish_for(
        &self,
        message: impl Into<String>,
        severity: Severity,
        display_duration: Duration,
    ) -> FeedbackEvent {
        let event = FeedbackEvent::new(message, severity, display_duration);
        match severity {
            Severity::Error => tracing::error!("Feedback: {}", event.message),
            Severity::Warning => tracing::warn!("Feedback: {}", event.message),
            _ => tracing::info!("Feedback: {}", event.message),
        }
        *self.current.write() = Some(event.clone());
        let _ = self.event_tx.send(event.clone());
        event
    }

    /// Latest event that has not yet expired
    pub fn current(&self) -> Option<FeedbackEvent> {
        let mut current = self.current.write();
        if current.as_ref().map(|e| e.is_expired()).unwrap_or(false) {
            *current = None;
        }
        current.clone()
    }

    /// Dismiss the current event early
    pub fn dismiss(&self) {
        *self.current.write() = None;
    }
}
