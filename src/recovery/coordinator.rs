//! Recovery coordinator
//!
//! Records failures, surfaces suggestions and drives the bounded-retry
//! recovery protocol. The coordinator never writes session state itself:
//! the procedure for each action is supplied by a `RecoveryHandler`, and the
//! caller applies the outcome.

use super::policy::{self, ErrorRecord, RecoveryAction};
use crate::capture::traits::ThermalMonitor;
use crate::config::SessionConfig;
use crate::feedback::{FeedbackChannel, Severity};
use crate::utils::error::CaptureError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Performs the kind-specific recovery procedures
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    /// What a successful procedure produces
    type Output: Send;

    async fn perform(
        &self,
        action: RecoveryAction,
        error: &CaptureError,
    ) -> Result<Self::Output, CaptureError>;
}

/// Where the coordinator is in the protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStatus {
    /// No error recorded
    Idle,
    /// A recovery attempt is waiting or running
    Recovering { kind: CaptureError, attempt: u32 },
    /// An error is recorded and nothing is running
    Surfaced,
}

/// Result of a bounded thermal wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalRecovery {
    Recovered,
    TimedOut,
    Cancelled,
}

/// Result of one `handle_error` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome<T> {
    /// The recovery procedure succeeded
    Recovered(T),
    /// The procedure ran and failed with a new error
    Failed(CaptureError),
    /// Retry budget spent; a terminal feedback event was published
    Exhausted,
    /// The error kind is never retried
    Terminal,
    /// `clear_error` or a new transition interrupted the attempt
    Cancelled,
}

struct CoordinatorInner {
    record: Option<ErrorRecord>,
    retry_count: u32,
    status: RecoveryStatus,
    /// Bumped whenever in-flight work is invalidated
    epoch: u64,
    cancel: CancellationToken,
}

impl CoordinatorInner {
    fn invalidate(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.epoch += 1;
    }
}

/// Classifies failures and runs bounded recovery
pub struct RecoveryCoordinator {
    inner: Mutex<CoordinatorInner>,
    feedback: Arc<FeedbackChannel>,
    thermal: Arc<dyn ThermalMonitor>,
    max_retries: u32,
    recovery_delay: Duration,
    thermal_poll: Duration,
    thermal_timeout: Duration,
}

impl RecoveryCoordinator {
    pub fn new(
        config: &SessionConfig,
        feedback: Arc<FeedbackChannel>,
        thermal: Arc<dyn ThermalMonitor>,
    ) -> Self {
        Self {
            inner: Mutex::new(CoordinatorInner {
                record: None,
                retry_count: 0,
                status: RecoveryStatus::Idle,
                epoch: 0,
                cancel: CancellationToken::new(),
            }),
            feedback,
            thermal,
            max_retries: config.max_retries,
            recovery_delay: config.recovery_delay(),
            thermal_poll: config.thermal_poll(),
            thermal_timeout: config.thermal_timeout(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    pub fn current_error(&self) -> Option<ErrorRecord> {
        self.inner.lock().record.clone()
    }

    pub fn status(&self) -> RecoveryStatus {
        self.inner.lock().status.clone()
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self.inner.lock().status, RecoveryStatus::Recovering { .. })
    }

    /// Reset the retry budget and forget the recorded error. Cancels any
    /// in-flight recovery.
    pub fn clear_error(&self) {
        let mut inner = self.inner.lock();
        if inner.record.is_some() || inner.retry_count > 0 {
            tracing::info!("Clearing recovery state (retries used: {})", inner.retry_count);
        }
        inner.invalidate();
        inner.record = None;
        inner.retry_count = 0;
        inner.status = RecoveryStatus::Idle;
    }

    /// Cancel in-flight recovery without re-arming retries
    pub fn cancel_in_flight(&self) {
        let mut inner = self.inner.lock();
        if let RecoveryStatus::Recovering { kind, attempt } = &inner.status {
            tracing::info!("Cancelling recovery attempt {} for {}", attempt, kind);
        }
        inner.invalidate();
        inner.status = if inner.record.is_some() {
            RecoveryStatus::Surfaced
        } else {
            RecoveryStatus::Idle
        };
    }

    /// Record `error` and, budget permitting, run one recovery attempt
    pub async fn handle_error<H>(&self, error: CaptureError, handler: &H) -> RecoveryOutcome<H::Output>
    where
        H: RecoveryHandler + ?Sized,
    {
        let action = policy::recovery_action(&error);

        let (epoch, cancel, action) = {
            let mut inner = self.inner.lock();
            let action = match action {
                Some(action) => action,
                None => {
                    inner.record = Some(ErrorRecord::new(error.clone(), inner.retry_count));
                    inner.status = RecoveryStatus::Surfaced;
                    drop(inner);
                    tracing::error!("Terminal capture error: {}", error);
                    self.feedback
                        .publish(policy::terminal_message(&error), Severity::Error);
                    return RecoveryOutcome::Terminal;
                }
            };

            if inner.retry_count >= self.max_retries {
                inner.record = Some(ErrorRecord::new(error.clone(), inner.retry_count));
                inner.status = RecoveryStatus::Surfaced;
                drop(inner);
                tracing::error!("Recovery exhausted for {}", error);
                self.feedback.publish(
                    format!("Unable to recover: {}. Restart the camera to try again.", error),
                    Severity::Error,
                );
                return RecoveryOutcome::Exhausted;
            }

            inner.retry_count += 1;
            let record = ErrorRecord::new(error.clone(), inner.retry_count);
            let message = format!("{}. {}", capitalize(&error.to_string()), record.suggestions.join(". "));
            inner.status = RecoveryStatus::Recovering {
                kind: error.clone(),
                attempt: inner.retry_count,
            };
            inner.record = Some(record);
            tracing::warn!(
                "Recovering from {} (attempt {}/{}) via {:?}",
                error,
                inner.retry_count,
                self.max_retries,
                action
            );
            let ticket = (inner.epoch, inner.cancel.clone(), action);
            drop(inner);

            self.feedback.publish(message, Severity::Warning);
            ticket
        };

        tokio::select! {
            _ = cancel.cancelled() => return RecoveryOutcome::Cancelled,
            _ = tokio::time::sleep(self.recovery_delay) => {}
        }

        if action == RecoveryAction::AwaitThermalRecovery {
            match self.poll_thermal(&cancel).await {
                ThermalRecovery::Recovered => {}
                ThermalRecovery::Cancelled => return RecoveryOutcome::Cancelled,
                ThermalRecovery::TimedOut => {
                    self.feedback.publish(
                        "Device is still too warm. Camera use is limited until it cools down.",
                        Severity::Warning,
                    );
                    return self.finish(epoch, RecoveryOutcome::Failed(CaptureError::ThermalThrottling));
                }
            }
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return RecoveryOutcome::Cancelled,
            result = handler.perform(action, &error) => result,
        };

        match result {
            Ok(output) => {
                let outcome = self.finish(epoch, RecoveryOutcome::Recovered(output));
                if matches!(outcome, RecoveryOutcome::Recovered(_)) {
                    tracing::info!("Recovered from {}", error);
                    self.feedback.publish("Camera recovered", Severity::Success);
                }
                outcome
            }
            Err(next) => {
                tracing::warn!("Recovery via {:?} failed: {}", action, next);
                self.finish(epoch, RecoveryOutcome::Failed(next))
            }
        }
    }

    /// Drop results that arrive after the attempt was invalidated
    fn finish<T>(&self, epoch: u64, outcome: RecoveryOutcome<T>) -> RecoveryOutcome<T> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            tracing::debug!("Discarding stale recovery result");
            return RecoveryOutcome::Cancelled;
        }
        inner.status = RecoveryStatus::Surfaced;
        outcome
    }

    /// Wait for the thermal state to return to nominal, sampling every poll
    /// interval and giving up at the timeout
    pub async fn wait_for_thermal_recovery(&self) -> ThermalRecovery {
        let cancel = self.inner.lock().cancel.clone();
        self.poll_thermal(&cancel).await
    }

    async fn poll_thermal(&self, cancel: &CancellationToken) -> ThermalRecovery {
        let deadline = Instant::now() + self.thermal_timeout;

        loop {
            let state = self.thermal.thermal_state();
            if state.is_nominal() {
                tracing::info!("Thermal state back to nominal");
                return ThermalRecovery::Recovered;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("Thermal recovery timed out (state: {:?})", state);
                return ThermalRecovery::TimedOut;
            }

            let wait = self.thermal_poll.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return ThermalRecovery::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
