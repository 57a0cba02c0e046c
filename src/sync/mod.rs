//! Multi-stream synchronization
//!
//! Streams are derived from the session state; the synchronizer elects a
//! master stream and aligns the others to its clock.

pub mod clock;
pub mod stream;
pub mod synchronizer;

pub use clock::{ClockSample, StreamClock};
pub use stream::{StreamDescriptor, StreamId, StreamPriority};
pub use synchronizer::StreamSynchronizer;
