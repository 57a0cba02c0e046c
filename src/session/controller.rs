//! Session controller
//!
//! Orchestrates the capture session: picks devices from the catalog, pairs
//! formats for dual capture, drives the state machine through each
//! transition, keeps the stream set in step with the landed state and hands
//! failures to the recovery coordinator.

use super::capabilities::Capabilities;
use super::hardware::{CaptureHardware, ConfigurationScope};
use super::state::{SessionState, SessionStateMachine, StateSnapshot, TransitionTicket};
use crate::capture::catalog::{DeviceCatalog, UseCase};
use crate::capture::formats::{FormatCompatibilityEngine, TargetProfile};
use crate::capture::traits::{
    DeviceFeed, DeviceRef, FormatDescriptor, ResourceMonitor, ResourcePressure, ThermalMonitor,
    ThermalState,
};
use crate::config::{ConfigStore, SessionConfig, MULTI_CAM_TOGGLE};
use crate::feedback::{FeedbackChannel, Severity};
use crate::recovery::coordinator::{RecoveryCoordinator, RecoveryHandler, RecoveryOutcome};
use crate::recovery::policy::{self, ErrorRecord, RecoveryAction};
use crate::sync::StreamSynchronizer;
use crate::utils::error::{CaptureError, MediaKind, SessionError, SessionResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// What a caller asks the session to become
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    Single(UseCase),
    Dual,
}

/// Why a transition was requested; decides how a failed commit is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Configure,
    DeviceChange,
}

/// Platform collaborators the controller consumes
pub struct Collaborators {
    pub feed: Arc<dyn DeviceFeed>,
    pub hardware: Arc<dyn CaptureHardware>,
    pub thermal: Arc<dyn ThermalMonitor>,
    pub resources: Arc<dyn ResourceMonitor>,
    pub store: Arc<dyn ConfigStore>,
}

/// Devices and formats a target resolves to
struct Plan {
    snapshot: StateSnapshot,
    inputs: Vec<(DeviceRef, Option<FormatDescriptor>)>,
}

/// Resolves an in-flight transition to `Error` if the future driving it is
/// dropped before the transition lands
struct PendingTransition<'a> {
    controller: &'a SessionController,
    ticket: Option<TransitionTicket>,
}

impl PendingTransition<'_> {
    fn complete(mut self) -> SessionResult<SessionState> {
        match self.ticket.take() {
            Some(ticket) => self.controller.state.complete_transition(ticket),
            None => Err(SessionError::StaleTransition),
        }
    }

    /// Hand resolution over to the caller
    fn disarm(mut self) {
        self.ticket = None;
    }
}

impl Drop for PendingTransition<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            let controller = self.controller;
            let record = ErrorRecord::new(CaptureError::SetupFailed, controller.recovery.retry_count());
            if controller.state.abandon_transition(ticket, record) {
                controller.after_landing(&controller.state.state());
            }
        }
    }
}

/// Owns the capture session and everything derived from it
pub struct SessionController {
    config: SessionConfig,
    catalog: DeviceCatalog,
    engine: FormatCompatibilityEngine,
    state: SessionStateMachine,
    synchronizer: StreamSynchronizer,
    recovery: RecoveryCoordinator,
    feedback: Arc<FeedbackChannel>,
    hardware: Arc<dyn CaptureHardware>,
    thermal: Arc<dyn ThermalMonitor>,
    resources: Arc<dyn ResourceMonitor>,
    store: Arc<dyn ConfigStore>,
    capabilities: watch::Sender<Capabilities>,
    /// Held for the whole of a transition, recovery included
    transaction: tokio::sync::Mutex<()>,
    last_target: Mutex<Option<CaptureTarget>>,
}

impl SessionController {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            feed,
            hardware,
            thermal,
            resources,
            store,
        } = collaborators;

        let feedback = Arc::new(FeedbackChannel::new(config.feedback.clone()));
        let catalog = DeviceCatalog::new(feed, config.environment);
        let recovery = RecoveryCoordinator::new(&config, feedback.clone(), thermal.clone());
        let initial = Capabilities::compute(
            &SessionState::Uninitialized,
            &catalog,
            hardware.supports_multi_cam(),
        );
        let (capabilities, _) = watch::channel(initial);

        tracing::info!(
            "Session controller ready: {} device(s), multi-cam {}",
            catalog.all_devices().len(),
            hardware.supports_multi_cam()
        );

        Self {
            engine: FormatCompatibilityEngine::new(config.reliable_line_ceiling),
            synchronizer: StreamSynchronizer::new(config.sync_interval()),
            state: SessionStateMachine::new(),
            config,
            catalog,
            recovery,
            feedback,
            hardware,
            thermal,
            resources,
            store,
            capabilities,
            transaction: tokio::sync::Mutex::new(()),
            last_target: Mutex::new(None),
        }
    }

    // ---------------------------------------------------------------------
    // Read-only surface
    // ---------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn description(&self) -> String {
        self.state.description()
    }

    /// Every state the session enters, in order
    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.borrow()
    }

    pub fn subscribe_capabilities(&self) -> watch::Receiver<Capabilities> {
        self.capabilities.subscribe()
    }

    pub fn feedback(&self) -> &Arc<FeedbackChannel> {
        &self.feedback
    }

    pub fn synchronizer(&self) -> &StreamSynchronizer {
        &self.synchronizer
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Start capturing with one device
    pub async fn start_single(&self, use_case: UseCase) -> SessionResult<SessionState> {
        self.transition(CaptureTarget::Single(use_case), Intent::Configure)
            .await
    }

    /// Start capturing with a paired back/front configuration
    pub async fn start_dual(&self) -> SessionResult<SessionState> {
        self.transition(CaptureTarget::Dual, Intent::Configure).await
    }

    /// Dual when the user enabled it and the hardware supports it, otherwise
    /// the best back camera
    pub async fn start_preferred(&self) -> SessionResult<SessionState> {
        let enabled = match self.store.get_toggle(MULTI_CAM_TOGGLE) {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                tracing::warn!("Failed to read {} toggle: {:#}", MULTI_CAM_TOGGLE, e);
                false
            }
        };

        if enabled && self.hardware.supports_multi_cam() {
            self.start_dual().await
        } else {
            self.start_single(UseCase::BestBack).await
        }
    }

    /// Go from single to dual capture
    pub async fn switch_to_dual(&self) -> SessionResult<SessionState> {
        self.require_running()?;
        self.transition(CaptureTarget::Dual, Intent::Configure).await
    }

    /// Go from dual to single capture
    pub async fn switch_to_single(&self, use_case: UseCase) -> SessionResult<SessionState> {
        self.require_running()?;
        self.transition(CaptureTarget::Single(use_case), Intent::Configure)
            .await
    }

    /// Replace the single active device, e.g. back to front. A failed commit
    /// surfaces as `DeviceChangeFailed`.
    pub async fn switch_device(&self, use_case: UseCase) -> SessionResult<SessionState> {
        match self.state.state() {
            SessionState::Single(_) => {}
            SessionState::Transitioning { .. } => return Err(SessionError::TransitionInFlight),
            other => {
                return Err(SessionError::IllegalTransition {
                    from: other.description(),
                    to: "device change".to_string(),
                })
            }
        }
        self.transition(CaptureTarget::Single(use_case), Intent::DeviceChange)
            .await
    }

    /// Re-enumerate devices and refresh the capabilities summary
    pub fn refresh_devices(&self) -> usize {
        let count = self.catalog.refresh();
        self.refresh_capabilities();
        count
    }

    /// Dismiss the surfaced error and re-arm recovery retries. Cancels any
    /// recovery still waiting.
    pub fn acknowledge_error(&self) {
        self.recovery.clear_error();
        self.feedback.dismiss();
    }

    /// Stop streams and recovery and release the hardware
    pub async fn shutdown(self) {
        tracing::info!("Shutting down capture session");
        self.recovery.cancel_in_flight();
        let _txn = self.transaction.lock().await;

        self.synchronizer.clear();
        let mut scope = ConfigurationScope::open(self.hardware.as_ref());
        scope.detach_all();
        if let Err(e) = scope.commit().await {
            tracing::warn!("Failed to release capture hardware: {}", e);
        }
    }

    // ---------------------------------------------------------------------
    // Transition machinery
    // ---------------------------------------------------------------------

    fn require_running(&self) -> SessionResult<()> {
        match self.state.state() {
            SessionState::Single(_) | SessionState::Dual { .. } => Ok(()),
            SessionState::Transitioning { .. } => Err(SessionError::TransitionInFlight),
            other => Err(SessionError::IllegalTransition {
                from: other.description(),
                to: "switch".to_string(),
            }),
        }
    }

    async fn transition(&self, target: CaptureTarget, intent: Intent) -> SessionResult<SessionState> {
        // A new request supersedes any recovery still waiting
        self.recovery.cancel_in_flight();
        let _txn = self.transaction.lock().await;
        *self.last_target.lock() = Some(target);

        let current = self.state.state();
        let plan = match self.resolve(target) {
            Ok(plan) => plan,
            Err(error) => {
                return match current {
                    SessionState::Single(_) | SessionState::Dual { .. } => self.reject(error),
                    _ => self.fail(error).await,
                };
            }
        };

        if current.is_error() {
            return self.restore(plan).await;
        }
        if current.snapshot().as_ref() == Some(&plan.snapshot) {
            tracing::debug!("Session already in {}", plan.snapshot);
            return Ok(current);
        }

        let progress = progress_label(&current, &plan.snapshot);
        let ticket = self.state.begin_transition(plan.snapshot.clone(), progress)?;
        let pending = PendingTransition {
            controller: self,
            ticket: Some(ticket),
        };

        match self.configure(&plan).await {
            Ok(()) => {
                let landed = pending.complete()?;
                self.after_landing(&landed);
                self.feedback.publish(landed.description(), Severity::Info);
                Ok(landed)
            }
            Err(error) => {
                pending.disarm();
                let error = match intent {
                    Intent::Configure => error,
                    Intent::DeviceChange => {
                        tracing::warn!("Device change to {} failed: {}", plan.snapshot, error);
                        CaptureError::DeviceChangeFailed
                    }
                };
                self.fail(error).await
            }
        }
    }

    /// Error -> Single|Dual: configure first, then clear with the target
    async fn restore(&self, plan: Plan) -> SessionResult<SessionState> {
        match self.configure(&plan).await {
            Ok(()) => {
                self.state.clear_error(plan.snapshot)?;
                self.recovery.clear_error();
                let landed = self.state.state();
                self.after_landing(&landed);
                self.feedback.publish(landed.description(), Severity::Info);
                Ok(landed)
            }
            Err(error) => self.fail(error).await,
        }
    }

    /// A request that could not be planned while a session is running leaves
    /// the running session untouched
    fn reject(&self, error: CaptureError) -> SessionResult<SessionState> {
        tracing::warn!("Rejected session request: {}", error);
        let message = if error.is_recoverable() {
            format!("{}. {}", error, error.suggestions().join(". "))
        } else {
            policy::terminal_message(&error)
        };
        self.feedback.publish(message, Severity::Warning);
        Err(error.into())
    }

    /// Resolve into `Error`, then recover as far as the retry budget allows
    async fn fail(&self, error: CaptureError) -> SessionResult<SessionState> {
        let mut error = error;

        loop {
            self.state
                .set_error(ErrorRecord::new(error.clone(), self.recovery.retry_count()));
            self.after_landing(&self.state.state());

            match self.recovery.handle_error(error.clone(), self).await {
                RecoveryOutcome::Recovered(snapshot) => {
                    self.state.clear_error(snapshot)?;
                    self.recovery.clear_error();
                    let landed = self.state.state();
                    self.after_landing(&landed);
                    return Ok(landed);
                }
                RecoveryOutcome::Failed(next) => {
                    if !next.same_kind(&error) {
                        tracing::info!("Recovery hit a different failure: {} ({})", next, next.code());
                    }
                    error = next;
                }
                RecoveryOutcome::Exhausted => return self.fall_back_to_single(error).await,
                RecoveryOutcome::Terminal | RecoveryOutcome::Cancelled => {
                    return Err(error.into());
                }
            }
        }
    }

    /// Safe fallback once recovery is exhausted. The coordinator keeps its
    /// spent budget until `acknowledge_error`.
    async fn fall_back_to_single(&self, error: CaptureError) -> SessionResult<SessionState> {
        match self.plan_and_configure(CaptureTarget::Single(UseCase::BestBack)).await {
            Ok(snapshot) => {
                self.state.clear_error(snapshot)?;
                let landed = self.state.state();
                self.after_landing(&landed);
                tracing::warn!("Fell back to {} after {}", landed, error);
                // Supersedes the exhaustion notice in `current()`
                self.feedback.publish(
                    format!("Unable to recover: {}. Switched to a single camera.", error),
                    Severity::Error,
                );
            }
            Err(fallback_error) => {
                tracing::error!("Single-camera fallback failed: {}", fallback_error);
            }
        }
        Err(error.into())
    }

    fn resolve(&self, target: CaptureTarget) -> Result<Plan, CaptureError> {
        match target {
            CaptureTarget::Single(use_case) => {
                self.catalog.require_devices()?;
                let device = self.catalog.best_device(use_case).ok_or(match use_case {
                    UseCase::External => CaptureError::ExternalConnectionFailed,
                    _ => CaptureError::DeviceUnavailable {
                        media: MediaKind::Video,
                    },
                })?;
                let format = device.default_format();
                Ok(Plan {
                    snapshot: StateSnapshot::Single(device.clone()),
                    inputs: vec![(device, format)],
                })
            }
            CaptureTarget::Dual => {
                if !self.hardware.supports_multi_cam() {
                    return Err(CaptureError::FeatureNotSupported {
                        feature: "Dual camera".to_string(),
                    });
                }
                if self.thermal.thermal_state() >= ThermalState::Critical {
                    return Err(CaptureError::ThermalThrottling);
                }
                if self.resources.pressure() >= ResourcePressure::Critical {
                    return Err(CaptureError::InsufficientResources);
                }

                let (primary, secondary) = self
                    .catalog
                    .best_pair()
                    .ok_or(CaptureError::PairingConfigurationFailed)?;
                let target = TargetProfile {
                    resolution: self.config.target_resolution,
                    frame_rate: self.config.target_frame_rate,
                };
                let pair = self
                    .engine
                    .select_optimal_pair(&primary, &secondary, &target)
                    .ok_or(CaptureError::PairingConfigurationFailed)?;

                Ok(Plan {
                    snapshot: StateSnapshot::Dual {
                        primary: primary.clone(),
                        secondary: secondary.clone(),
                    },
                    inputs: vec![
                        (primary, Some(pair.primary)),
                        (secondary, Some(pair.secondary)),
                    ],
                })
            }
        }
    }

    /// Apply a plan to the hardware as one all-or-nothing change set
    async fn configure(&self, plan: &Plan) -> Result<(), CaptureError> {
        let mut scope = ConfigurationScope::open(self.hardware.as_ref());
        scope.detach_all();
        for (device, format) in &plan.inputs {
            scope.attach_input(device.clone(), *format);
            scope.attach_output(device.id.clone());
        }
        scope.commit().await
    }

    async fn plan_and_configure(&self, target: CaptureTarget) -> Result<StateSnapshot, CaptureError> {
        let plan = self.resolve(target)?;
        self.configure(&plan).await?;
        Ok(plan.snapshot)
    }

    fn after_landing(&self, state: &SessionState) {
        self.synchronizer.sync_with_state(state);
        self.refresh_capabilities();
    }

    fn refresh_capabilities(&self) {
        let next = Capabilities::compute(
            &self.state.state(),
            &self.catalog,
            self.hardware.supports_multi_cam(),
        );
        self.capabilities.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!("Capabilities changed: {:?}", next);
            *current = next;
            true
        });
    }
}

#[async_trait]
impl RecoveryHandler for SessionController {
    type Output = StateSnapshot;

    async fn perform(
        &self,
        action: RecoveryAction,
        _error: &CaptureError,
    ) -> Result<StateSnapshot, CaptureError> {
        let last_target = self
            .last_target
            .lock()
            .unwrap_or(CaptureTarget::Single(UseCase::BestBack));

        match action {
            RecoveryAction::RetryDiscovery => {
                self.catalog.refresh();
                self.plan_and_configure(last_target).await
            }
            RecoveryAction::RetryConfiguration
            | RecoveryAction::RetrySetup
            | RecoveryAction::RetryDeviceChange
            | RecoveryAction::AwaitThermalRecovery => self.plan_and_configure(last_target).await,
            RecoveryAction::FallbackToSingle | RecoveryAction::ReduceResourceUsage => {
                self.plan_and_configure(CaptureTarget::Single(UseCase::BestBack))
                    .await
            }
            RecoveryAction::RetryExternalConnection => {
                self.catalog.refresh();
                self.plan_and_configure(CaptureTarget::Single(UseCase::External))
                    .await
            }
        }
    }
}

fn progress_label(from: &SessionState, to: &StateSnapshot) -> String {
    match (from, to) {
        (_, StateSnapshot::Uninitialized) => "Stopping".to_string(),
        (SessionState::Single(_), StateSnapshot::Single(device)) => {
            format!("Switching to {}", device.name)
        }
        (_, StateSnapshot::Single(device)) => format!("Starting {}", device.name),
        (_, StateSnapshot::Dual { secondary, .. }) => format!("Adding {}", secondary.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{CaptureDevice, DevicePosition, DeviceType};
    use crate::capture::virtual_hardware::{VirtualDeviceFeed, VirtualHardware, VirtualSignals};
    use crate::config::MemoryConfigStore;
    use crate::utils::error::AttachDirection;
    use std::time::Duration;

    struct Rig {
        controller: SessionController,
        feed: Arc<VirtualDeviceFeed>,
        hardware: Arc<VirtualHardware>,
        signals: Arc<VirtualSignals>,
        store: Arc<MemoryConfigStore>,
    }

    fn triple_back() -> CaptureDevice {
        CaptureDevice::new("triple", "Back Triple Camera", DevicePosition::Back, DeviceType::Triple)
            .with_pairing(true)
            .with_formats(vec![
                FormatDescriptor::pairing(1080, 1920, 30),
                FormatDescriptor::pairing(4000, 3000, 30),
                FormatDescriptor::new(4032, 3024, 30).with_hdr(),
            ])
    }

    fn front() -> CaptureDevice {
        CaptureDevice::new("front", "Front Camera", DevicePosition::Front, DeviceType::WideAngle)
            .with_pairing(true)
            .with_formats(vec![
                FormatDescriptor::pairing(1080, 1920, 30),
                FormatDescriptor::pairing(720, 1280, 30),
            ])
    }

    fn rig(devices: Vec<CaptureDevice>, multi_cam: bool) -> Rig {
        let feed = Arc::new(VirtualDeviceFeed::new(devices));
        let hardware = Arc::new(VirtualHardware::new(multi_cam));
        let signals = Arc::new(VirtualSignals::new());
        let store = Arc::new(MemoryConfigStore::new());
        let controller = SessionController::new(
            SessionConfig::default(),
            Collaborators {
                feed: feed.clone(),
                hardware: hardware.clone(),
                thermal: signals.clone(),
                resources: signals.clone(),
                store: store.clone(),
            },
        );
        Rig {
            controller,
            feed,
            hardware,
            signals,
            store,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SessionState>) -> Vec<SessionState> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_single_passes_through_transitioning() {
        let rig = rig(vec![triple_back(), front()], true);
        let mut states = rig.controller.subscribe_state();

        let landed = rig.controller.start_single(UseCase::BestBack).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "triple"));

        let seen = drain(&mut states);
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_transitioning());
        assert_eq!(seen[1], landed);
        assert_eq!(rig.controller.synchronizer().active_streams().len(), 1);
        assert!(rig.hardware.attached().has_input("triple"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_to_dual_pairs_formats() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.controller.start_single(UseCase::BestBack).await.unwrap();
        let mut states = rig.controller.subscribe_state();

        let landed = rig.controller.switch_to_dual().await.unwrap();
        assert!(matches!(landed, SessionState::Dual { .. }));

        let seen = drain(&mut states);
        assert!(seen[0].is_transitioning());
        assert_eq!(seen.last(), Some(&landed));

        let graph = rig.hardware.attached();
        assert_eq!(graph.inputs.len(), 2);
        for input in &graph.inputs {
            let format = input.format.unwrap();
            assert_eq!(format.resolution.width, 1080);
            assert_eq!(format.resolution.height, 1920);
        }

        assert_eq!(rig.controller.synchronizer().active_streams().len(), 2);
        assert!(rig.controller.synchronizer().is_ticking());
        assert!(rig.controller.capabilities().pairing_supported);

        let landed = rig.controller.switch_to_single(UseCase::Front).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "front"));
        assert!(!rig.controller.synchronizer().is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_without_multi_cam_is_terminal() {
        let rig = rig(vec![triple_back(), front()], false);

        let err = rig.controller.start_dual().await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Capture(CaptureError::FeatureNotSupported {
                feature: "Dual camera".to_string()
            })
        );
        assert!(rig.controller.state().is_error());
        assert_eq!(rig.controller.recovery().retry_count(), 0);
        let event = rig.controller.feedback().current().unwrap();
        assert!(event.message.contains("not supported"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_request_while_running_keeps_session() {
        let rig = rig(vec![triple_back(), front()], false);
        rig.controller.start_single(UseCase::BestBack).await.unwrap();

        assert!(rig.controller.switch_to_dual().await.is_err());
        assert!(matches!(rig.controller.state(), SessionState::Single(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_commit_failure_recovers() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.hardware.fail_next(CaptureError::SetupFailed);

        let landed = rig.controller.start_single(UseCase::BestBack).await.unwrap();
        assert!(matches!(landed, SessionState::Single(_)));
        // Recovery succeeded and re-armed the budget
        assert_eq!(rig.controller.recovery().retry_count(), 0);
        assert!(rig.controller.recovery().current_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_failure_falls_back_to_single() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.hardware.fail_next(CaptureError::PairingConfigurationFailed);

        let landed = rig.controller.start_dual().await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "triple"));
        assert_eq!(rig.controller.synchronizer().active_streams().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_recovery_falls_back() {
        let rig = rig(vec![triple_back(), front()], true);
        // Initial attempt plus three retries all fail
        rig.hardware.fail_times(
            CaptureError::AttachFailed {
                direction: AttachDirection::Input,
            },
            4,
        );

        let err = rig.controller.start_dual().await.unwrap_err();
        assert!(matches!(err, SessionError::Capture(CaptureError::AttachFailed { .. })));
        assert!(matches!(rig.controller.state(), SessionState::Single(_)));
        assert_eq!(rig.controller.recovery().retry_count(), 3);

        let notice = rig.controller.feedback().current().unwrap();
        assert_eq!(notice.severity, Severity::Error);
        assert!(notice.message.starts_with("Unable to recover"));
        assert!(notice.message.contains("single camera"));

        rig.controller.acknowledge_error();
        assert_eq!(rig.controller.recovery().retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_transition_does_not_strand_session() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.hardware.set_commit_delay(Duration::from_millis(500));

        let attempt = tokio::time::timeout(
            Duration::from_millis(100),
            rig.controller.start_single(UseCase::BestBack),
        )
        .await;
        assert!(attempt.is_err());

        let state = rig.controller.state();
        assert!(!state.is_transitioning());
        assert_eq!(state.error().map(|r| r.kind.clone()), Some(CaptureError::SetupFailed));
        assert!(rig.hardware.attached().is_empty());

        let landed = rig.controller.start_single(UseCase::BestBack).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "triple"));
        assert!(rig.controller.switch_to_dual().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_device_passes_through_transitioning() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.controller.start_single(UseCase::BestBack).await.unwrap();
        let mut states = rig.controller.subscribe_state();

        let landed = rig.controller.switch_device(UseCase::Front).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "front"));

        let seen = drain(&mut states);
        assert_eq!(seen.len(), 2);
        assert!(
            matches!(&seen[0], SessionState::Transitioning { progress, .. } if progress == "Switching to Front Camera")
        );
        assert_eq!(seen[1], landed);

        let graph = rig.hardware.attached();
        assert!(graph.has_input("front"));
        assert!(!graph.has_input("triple"));
        assert!(rig.controller.synchronizer().stream_for_device("front").is_some());
        assert!(rig.controller.synchronizer().stream_for_device("triple").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_device_to_current_device_is_noop() {
        let rig = rig(vec![triple_back(), front()], true);
        let started = rig.controller.start_single(UseCase::BestBack).await.unwrap();
        let commits = rig.hardware.commit_count();

        let landed = rig.controller.switch_device(UseCase::BestBack).await.unwrap();
        assert_eq!(landed, started);
        assert_eq!(rig.hardware.commit_count(), commits);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_device_requires_single() {
        let rig = rig(vec![triple_back(), front()], true);
        assert!(matches!(
            rig.controller.switch_device(UseCase::Front).await,
            Err(SessionError::IllegalTransition { .. })
        ));

        rig.controller.start_dual().await.unwrap();
        assert!(matches!(
            rig.controller.switch_device(UseCase::Front).await,
            Err(SessionError::IllegalTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_device_change_is_retried() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.controller.start_single(UseCase::BestBack).await.unwrap();
        let mut states = rig.controller.subscribe_state();
        rig.hardware.fail_next(CaptureError::AttachFailed {
            direction: AttachDirection::Input,
        });

        let landed = rig.controller.switch_device(UseCase::Front).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "front"));

        let surfaced: Vec<CaptureError> = drain(&mut states)
            .iter()
            .filter_map(|s| s.error().map(|r| r.kind.clone()))
            .collect();
        assert_eq!(surfaced, vec![CaptureError::DeviceChangeFailed]);
        assert_eq!(rig.controller.recovery().retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_catalog_does_not_panic() {
        let rig = rig(vec![], true);
        let err = rig.controller.start_single(UseCase::BestBack).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Capture(CaptureError::DeviceUnavailable {
                media: MediaKind::Video
            })
        );
        assert!(rig.controller.state().is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_retry_picks_up_new_device() {
        let rig = rig(vec![], true);
        let feed = rig.feed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            feed.push_device(triple_back());
        });

        let landed = rig.controller.start_single(UseCase::BestBack).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "triple"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_thermal_blocks_dual() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.signals.set_thermal_state(ThermalState::Critical);
        let signals = rig.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            signals.set_thermal_state(ThermalState::Nominal);
        });

        let landed = rig.controller.start_dual().await.unwrap();
        assert!(matches!(landed, SessionState::Dual { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_preferred_reads_toggle() {
        let untoggled = rig(vec![triple_back(), front()], true);
        let landed = untoggled.controller.start_preferred().await.unwrap();
        assert!(matches!(landed, SessionState::Single(_)));

        let toggled = rig(vec![triple_back(), front()], true);
        toggled.store.set_toggle(MULTI_CAM_TOGGLE, true).unwrap();
        let landed = toggled.controller.start_preferred().await.unwrap();
        assert!(matches!(landed, SessionState::Dual { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_request_from_error_restores() {
        let rig = rig(vec![triple_back(), front()], false);
        rig.controller.start_dual().await.unwrap_err();
        assert!(rig.controller.state().is_error());

        let landed = rig.controller.start_single(UseCase::Front).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "front"));
        assert!(rig.controller.recovery().current_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hdr_capability_follows_active_device() {
        let rig = rig(vec![triple_back(), front()], true);
        let mut caps = rig.controller.subscribe_capabilities();
        assert!(!rig.controller.capabilities().hdr_supported);

        rig.controller.start_single(UseCase::BestBack).await.unwrap();
        assert!(caps.has_changed().unwrap());
        assert!(caps.borrow_and_update().hdr_supported);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_request_supersedes_pending_recovery() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.hardware.fail_next(CaptureError::SetupFailed);
        let controller = Arc::new(rig.controller);

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start_single(UseCase::BestBack).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(controller.recovery().is_recovering());

        let landed = controller.start_single(UseCase::Front).await.unwrap();
        assert!(matches!(&landed, SessionState::Single(d) if d.id == "front"));

        let first = first.await.unwrap();
        assert_eq!(first.unwrap_err(), SessionError::Capture(CaptureError::SetupFailed));
        assert_eq!(controller.state(), landed);
        assert!(rig.hardware.attached().has_input("front"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_hardware() {
        let rig = rig(vec![triple_back(), front()], true);
        rig.controller.start_dual().await.unwrap();
        let hardware = rig.hardware.clone();

        rig.controller.shutdown().await;
        assert!(hardware.attached().is_empty());
    }
}
