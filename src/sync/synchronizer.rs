//! Stream synchronizer
//!
//! Keeps the set of streams derived from the session state, elects a master
//! stream by priority and, while more than one stream is active, reconciles
//! every other stream to the master on a fixed cadence.

use super::clock::{ClockSample, StreamClock};
use super::stream::{StreamDescriptor, StreamId, StreamPriority};
use crate::capture::traits::DeviceRef;
use crate::session::state::SessionState;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct StreamEntry {
    descriptor: StreamDescriptor,
    clock: StreamClock,
}

#[derive(Default)]
struct SyncInner {
    streams: BTreeMap<StreamId, StreamEntry>,
    next_id: u64,
    master: Option<StreamId>,
    is_synchronized: bool,
    ticks: u64,
}

impl SyncInner {
    fn active_ids(&self) -> Vec<StreamId> {
        self.streams
            .values()
            .filter(|e| e.descriptor.active)
            .map(|e| e.descriptor.id)
            .collect()
    }

    /// Highest priority wins; ties go to the earliest registered stream
    fn elect_master(&self) -> Option<StreamId> {
        self.streams
            .values()
            .filter(|e| e.descriptor.active)
            .max_by_key(|e| (e.descriptor.priority, Reverse(e.descriptor.id)))
            .map(|e| e.descriptor.id)
    }
}

struct Shared {
    inner: Mutex<SyncInner>,
    /// Running ticker, tagged with a generation so a finished task never
    /// cancels its successor
    ticker: Mutex<Option<(u64, CancellationToken)>>,
    ticker_generation: Mutex<u64>,
}

impl Shared {
    fn active_count(&self) -> usize {
        self.inner.lock().active_ids().len()
    }

    fn tick(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.active_ids().is_empty() {
            inner.is_synchronized = false;
            return false;
        }

        let master = inner.elect_master();
        if master != inner.master {
            tracing::debug!("Master stream elected: {:?}", master);
            for entry in inner.streams.values_mut() {
                entry.clock.reset();
            }
            inner.master = master;
        }

        let master_sample = master
            .and_then(|id| inner.streams.get(&id))
            .and_then(|e| e.clock.latest());

        if let Some(reference) = master_sample {
            for entry in inner.streams.values_mut() {
                if Some(entry.descriptor.id) != master && entry.descriptor.active {
                    entry.clock.reconcile(&reference);
                }
            }
        }

        inner.is_synchronized = true;
        inner.ticks += 1;
        true
    }

    /// Called by the ticker task. Stops it only if at most one stream is
    /// still active, checked under the ticker lock so a concurrent
    /// `add_stream` cannot slip in between. Returns whether the task should
    /// exit.
    fn stop_if_idle(&self, generation: u64) -> bool {
        let mut slot = self.ticker.lock();
        match &*slot {
            Some((current, _)) if *current == generation => {}
            _ => return true,
        }
        if self.active_count() > 1 {
            return false;
        }
        if let Some((_, token)) = slot.take() {
            token.cancel();
            tracing::debug!("Stream sync ticker stopped");
        }
        true
    }

    fn stop_ticker(&self) {
        if let Some((_, token)) = self.ticker.lock().take() {
            token.cancel();
            tracing::debug!("Stream sync ticker stopped");
        }
    }
}

/// Keeps active streams aligned to a master stream
pub struct StreamSynchronizer {
    shared: Arc<Shared>,
    interval: Duration,
}

impl StreamSynchronizer {
    pub fn new(interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(SyncInner::default()),
                ticker: Mutex::new(None),
                ticker_generation: Mutex::new(0),
            }),
            interval,
        }
    }

    /// Register an active stream for `device`
    pub fn add_stream(&self, device: DeviceRef) -> StreamId {
        let id = {
            let mut inner = self.shared.inner.lock();
            let id = StreamId(inner.next_id);
            inner.next_id += 1;
            let priority = StreamPriority::for_device(&device);
            tracing::info!("Adding {} for {} ({:?})", id, device.id, priority);
            inner.streams.insert(
                id,
                StreamEntry {
                    descriptor: StreamDescriptor {
                        id,
                        device,
                        priority,
                        active: true,
                    },
                    clock: StreamClock::default(),
                },
            );
            inner.is_synchronized = false;
            id
        };
        self.update_ticker();
        id
    }

    /// Unregister a stream
    pub fn remove_stream(&self, id: StreamId) -> Option<StreamDescriptor> {
        let removed = {
            let mut inner = self.shared.inner.lock();
            let removed = inner.streams.remove(&id).map(|e| e.descriptor);
            if removed.is_some() {
                tracing::info!("Removed {}", id);
                if inner.master == Some(id) {
                    inner.master = None;
                }
                inner.is_synchronized = false;
            }
            removed
        };
        self.update_ticker();
        removed
    }

    /// Pause or resume a stream without unregistering it
    pub fn set_active(&self, id: StreamId, active: bool) -> bool {
        let found = {
            let mut inner = self.shared.inner.lock();
            match inner.streams.get_mut(&id) {
                Some(entry) => {
                    entry.descriptor.active = active;
                    true
                }
                None => false,
            }
        };
        self.update_ticker();
        found
    }

    /// Make the stream set match the devices active in `state`
    pub fn sync_with_state(&self, state: &SessionState) {
        let wanted = state.active_devices();

        let stale: Vec<StreamId> = {
            let inner = self.shared.inner.lock();
            inner
                .streams
                .values()
                .filter(|e| !wanted.iter().any(|d| d.id == e.descriptor.device.id))
                .map(|e| e.descriptor.id)
                .collect()
        };
        for id in stale {
            self.remove_stream(id);
        }

        for device in wanted {
            let present = self
                .shared
                .inner
                .lock()
                .streams
                .values()
                .any(|e| e.descriptor.device.id == device.id);
            if !present {
                self.add_stream(device);
            }
        }
    }

    /// Drop every stream and stop ticking
    pub fn clear(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.streams.clear();
            inner.master = None;
            inner.is_synchronized = false;
        }
        self.shared.stop_ticker();
    }

    pub fn active_streams(&self) -> Vec<StreamDescriptor> {
        self.shared
            .inner
            .lock()
            .streams
            .values()
            .filter(|e| e.descriptor.active)
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn stream_for_device(&self, device_id: &str) -> Option<StreamId> {
        self.shared
            .inner
            .lock()
            .streams
            .values()
            .find(|e| e.descriptor.device.id == device_id)
            .map(|e| e.descriptor.id)
    }

    /// Master elected on the last tick
    pub fn master(&self) -> Option<StreamId> {
        self.shared.inner.lock().master
    }

    pub fn is_synchronized(&self) -> bool {
        self.shared.inner.lock().is_synchronized
    }

    pub fn tick_count(&self) -> u64 {
        self.shared.inner.lock().ticks
    }

    pub fn is_ticking(&self) -> bool {
        self.shared.ticker.lock().is_some()
    }

    /// Feed a timestamp observation for a stream
    pub fn report_timestamp(&self, id: StreamId, sample: ClockSample) -> bool {
        match self.shared.inner.lock().streams.get_mut(&id) {
            Some(entry) => {
                entry.clock.record(sample);
                true
            }
            None => false,
        }
    }

    /// Map a stream timestamp onto the master timeline
    pub fn aligned_pts(&self, id: StreamId, pts: Duration) -> Option<Duration> {
        self.shared
            .inner
            .lock()
            .streams
            .get(&id)
            .map(|e| e.clock.align(pts))
    }

    /// Run one synchronization pass. No-op when nothing is active.
    pub fn tick(&self) -> bool {
        self.shared.tick()
    }

    /// Start or stop the periodic ticker to match the active stream count.
    /// Lock order is `ticker` then `inner`, as in `Shared::stop_if_idle`.
    fn update_ticker(&self) {
        let mut slot = self.shared.ticker.lock();
        if self.shared.active_count() <= 1 {
            if let Some((_, token)) = slot.take() {
                token.cancel();
                tracing::debug!("Stream sync ticker stopped");
            }
            return;
        }
        if slot.is_some() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime; stream sync ticks must be driven manually");
                return;
            }
        };

        let generation = {
            let mut counter = self.shared.ticker_generation.lock();
            *counter += 1;
            *counter
        };
        let token = CancellationToken::new();
        *slot = Some((generation, token.clone()));
        drop(slot);

        tracing::debug!("Stream sync ticker started ({:?})", self.interval);
        handle.spawn(run_ticker(
            self.shared.clone(),
            self.interval,
            generation,
            token,
        ));
    }
}

impl Drop for StreamSynchronizer {
    fn drop(&mut self) {
        self.shared.stop_ticker();
    }
}

async fn run_ticker(shared: Arc<Shared>, interval: Duration, generation: u64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if shared.stop_if_idle(generation) {
                    break;
                }
                shared.tick();
            }
        }
    }
}
