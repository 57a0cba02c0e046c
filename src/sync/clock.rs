//! Clock-domain reconciliation
//!
//! Each stream reports (presentation timestamp, host arrival time) pairs.
//! The skew of a stream is `pts - host`; a non-master stream's correction
//! tracks the difference between its skew and the master's, smoothed with
//! an exponential moving average so single late frames do not jerk the
//! alignment.

use std::time::Duration;

/// Weight of the newest raw offset in the moving average
pub const SMOOTHING: f64 = 0.25;

/// One timestamp observation from a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Presentation timestamp in the stream's own clock
    pub pts: Duration,
    /// Arrival time on the shared host clock
    pub host: Duration,
}

impl ClockSample {
    pub fn new(pts: Duration, host: Duration) -> Self {
        Self { pts, host }
    }

    fn skew_nanos(&self) -> i64 {
        self.pts.as_nanos() as i64 - self.host.as_nanos() as i64
    }
}

/// Per-stream reconciliation state
#[derive(Debug, Default, Clone)]
pub struct StreamClock {
    latest: Option<ClockSample>,
    fresh: bool,
    correction_ns: Option<f64>,
}

impl StreamClock {
    pub fn record(&mut self, sample: ClockSample) {
        self.latest = Some(sample);
        self.fresh = true;
    }

    pub fn latest(&self) -> Option<ClockSample> {
        self.latest
    }

    /// Current correction in nanoseconds (0 until first reconciled)
    pub fn correction_nanos(&self) -> i64 {
        self.correction_ns.map(|c| c.round() as i64).unwrap_or(0)
    }

    /// Forget the accumulated correction, e.g. after a master change
    pub fn reset(&mut self) {
        self.correction_ns = None;
    }

    /// Fold the newest sample into the correction against `master`.
    /// Returns false when there is no fresh sample to use.
    pub fn reconcile(&mut self, master: &ClockSample) -> bool {
        let sample = match self.latest {
            Some(sample) if self.fresh => sample,
            _ => return false,
        };

        let raw = (sample.skew_nanos() - master.skew_nanos()) as f64;
        let next = match self.correction_ns {
            None => raw,
            Some(current) => current + SMOOTHING * (raw - current),
        };

        self.correction_ns = Some(next);
        self.fresh = false;
        true
    }

    /// Map a timestamp from this stream into the master's timeline
    pub fn align(&self, pts: Duration) -> Duration {
        let correction = self.correction_nanos();
        if correction >= 0 {
            pts.saturating_sub(Duration::from_nanos(correction as u64))
        } else {
            pts + Duration::from_nanos(correction.unsigned_abs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_reconcile_takes_raw_offset() {
        let master = ClockSample::new(ms(1000), ms(5000));
        let mut clock = StreamClock::default();
        // Slave pts runs 40ms ahead of master for the same host instant
        clock.record(ClockSample::new(ms(1040), ms(5000)));

        assert!(clock.reconcile(&master));
        assert_eq!(clock.correction_nanos(), 40_000_000);
        assert_eq!(clock.align(ms(1040)), ms(1000));
    }

    #[test]
    fn test_stale_sample_is_not_reused() {
        let master = ClockSample::new(ms(0), ms(0));
        let mut clock = StreamClock::default();
        assert!(!clock.reconcile(&master));

        clock.record(ClockSample::new(ms(10), ms(0)));
        assert!(clock.reconcile(&master));
        assert!(!clock.reconcile(&master));
    }

    #[test]
    fn test_smoothing_moves_towards_new_offset() {
        let master = ClockSample::new(ms(0), ms(0));
        let mut clock = StreamClock::default();
        clock.record(ClockSample::new(ms(40), ms(0)));
        clock.reconcile(&master);

        clock.record(ClockSample::new(ms(80), ms(0)));
        clock.reconcile(&master);
        // 40 + 0.25 * (80 - 40)
        assert_eq!(clock.correction_nanos(), 50_000_000);
    }

    #[test]
    fn test_negative_correction_shifts_forward() {
        let master = ClockSample::new(ms(100), ms(0));
        let mut clock = StreamClock::default();
        clock.record(ClockSample::new(ms(70), ms(0)));
        clock.reconcile(&master);
        assert_eq!(clock.align(ms(70)), ms(100));

        clock.reset();
        assert_eq!(clock.correction_nanos(), 0);
    }
}
