//! Video and telemetry on one timeline
//!
//! [`VideoSyncEngine`] owns the offset between an onboard video and the
//! telemetry, [`FrameLoop`] drives it from a background thread and
//! [`SyncStore`] remembers the offset per session.

pub mod clock;
pub mod engine;
pub mod frame_loop;
pub mod store;

pub use clock::{PlaybackClock, VideoClock};
pub use engine::{FrameStep, SyncConfig, VideoSyncEngine, VideoSyncState, nearest_sample_index};
pub use frame_loop::FrameLoop;
pub use store::{FileBasedSyncStore, SyncRecord, SyncStore};
