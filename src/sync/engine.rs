// Keeps the telemetry cursor and the onboard video on one timeline.
//
// Two update sources race for the shared position: video frames (which drive
// the telemetry cursor while locked and playing) and telemetry scrubbing (which
// seeks the video while locked). The `syncing` flag marks the tick in which the
// video drove the cursor, and scrub-driven seeks are suppressed for that tick so
// the two directions never feed back into each other.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::RacelogError;

use super::{clock::VideoClock, store::SyncRecord};

const SEEK_INTERVAL_MS: u64 = 66;
const FRAME_INTERVAL_MS: u64 = 16;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum time between video seeks triggered by telemetry scrubbing
    pub seek_interval_ms: u64,
    /// Tick of the frame loop when the video has no frame callbacks
    pub frame_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            seek_interval_ms: SEEK_INTERVAL_MS,
            frame_interval_ms: FRAME_INTERVAL_MS,
        }
    }
}

/// What the presentation layer needs after each update
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoSyncState {
    /// `telemetry_time = video_time + offset`
    pub offset_ms: f64,
    pub locked: bool,
    pub playing: bool,
    pub telemetry_index: usize,
    pub telemetry_time_ms: f64,
    /// `None` without a video
    pub video_time_ms: Option<f64>,
    /// The telemetry cursor maps to a time outside the video
    pub out_of_range: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStep {
    Forward,
    Backward,
}

/// Index of the timestamp closest to `target_ms`, the earlier one on ties.
/// `timestamps` must be sorted.
pub fn nearest_sample_index(timestamps: &[f64], target_ms: f64) -> Option<usize> {
    let last = timestamps.len().checked_sub(1)?;
    let upper = timestamps.partition_point(|&t| t < target_ms);
    if upper == 0 {
        return Some(0);
    }
    if upper > last {
        return Some(last);
    }
    let lower = upper - 1;
    if target_ms - timestamps[lower] <= timestamps[upper] - target_ms {
        Some(lower)
    } else {
        Some(upper)
    }
}

pub struct VideoSyncEngine<V: VideoClock> {
    timestamps: Vec<f64>,
    video: Option<V>,
    offset_ms: f64,
    locked: bool,
    telemetry_index: usize,
    out_of_range: bool,
    /// Set while the video is the driving clock for the current tick
    syncing: bool,
    last_seek: Option<Instant>,
    pending_seek_s: Option<f64>,
    seek_interval: Duration,
    /// Bumped whenever scheduled frame loops must stop
    generation: u64,
}

impl<V: VideoClock> VideoSyncEngine<V> {
    pub fn new(timestamps: Vec<f64>, config: &SyncConfig) -> Result<Self, RacelogError> {
        if timestamps.is_empty() {
            return Err(RacelogError::InvalidUserInput {
                field: "timestamps".to_string(),
                reason: "telemetry has no samples to sync".to_string(),
            });
        }
        Ok(Self {
            timestamps,
            video: None,
            offset_ms: 0.,
            locked: false,
            telemetry_index: 0,
            out_of_range: false,
            syncing: false,
            last_seek: None,
            pending_seek_s: None,
            seek_interval: Duration::from_millis(config.seek_interval_ms),
            generation: 0,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once the engine has cancelled loops scheduled under `generation`
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn invalidate_loops(&mut self) {
        self.generation += 1;
        self.syncing = false;
        self.pending_seek_s = None;
    }

    pub fn video(&self) -> Option<&V> {
        self.video.as_ref()
    }

    pub fn load_video(&mut self, video: V) {
        info!(
            "Loaded video {} ({:.1}s at {:.2} fps)",
            video.name(),
            video.duration_s(),
            video.fps()
        );
        self.video = Some(video);
        self.out_of_range = false;
        self.invalidate_loops();
    }

    pub fn unload_video(&mut self) -> Option<V> {
        self.invalidate_loops();
        self.out_of_range = false;
        self.video.take()
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    pub fn set_offset_ms(&mut self, offset_ms: f64) {
        self.offset_ms = offset_ms;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Unlocking cancels any running frame loop
    pub fn set_locked(&mut self, locked: bool) {
        if self.locked && !locked {
            self.invalidate_loops();
        }
        self.locked = locked;
        debug!("Video sync {}", if locked { "locked" } else { "unlocked" });
    }

    fn sample_time_ms(&self, index: usize) -> f64 {
        self.timestamps
            .get(index)
            .or(self.timestamps.last())
            .copied()
            .unwrap_or(0.)
    }

    /// Anchors the two clocks at the instants currently displayed
    pub fn set_sync_point(&mut self) -> Result<f64, RacelogError> {
        let video = self.video.as_ref().ok_or(RacelogError::NoVideoLoaded)?;
        let video_time_ms = video.current_time_s() * 1000.;
        self.offset_ms = self.sample_time_ms(self.telemetry_index) - video_time_ms;
        self.out_of_range = false;
        info!("Sync point set, offset {:.0}ms", self.offset_ms);
        Ok(self.offset_ms)
    }

    /// One tick of the update loop. Flushes a throttled seek whose interval has
    /// passed and, while locked and playing, moves the telemetry cursor to the
    /// video's current time.
    pub fn frame(&mut self, now: Instant) -> VideoSyncState {
        self.syncing = false;

        if let Some(target_s) = self.pending_seek_s
            && self.seek_allowed(now)
            && let Some(video) = self.video.as_mut()
        {
            video.seek(target_s);
            self.last_seek = Some(now);
            self.pending_seek_s = None;
        }

        if self.locked
            && let Some(video) = self.video.as_ref()
            && video.is_playing()
        {
            let telemetry_time_ms = video.current_time_s() * 1000. + self.offset_ms;
            if let Some(index) = nearest_sample_index(&self.timestamps, telemetry_time_ms) {
                self.telemetry_index = index;
            }
            self.out_of_range = false;
            self.syncing = true;
        }
        self.state()
    }

    fn seek_allowed(&self, now: Instant) -> bool {
        self.last_seek
            .is_none_or(|last| now.saturating_duration_since(last) >= self.seek_interval)
    }

    /// Moves the telemetry cursor. While locked the video follows, unless the
    /// cursor update came from the video itself during this tick.
    pub fn scrub_telemetry(&mut self, index: usize, now: Instant) -> VideoSyncState {
        self.telemetry_index = index.min(self.timestamps.len() - 1);
        if self.syncing || !self.locked {
            return self.state();
        }
        let target_s = (self.sample_time_ms(self.telemetry_index) - self.offset_ms) / 1000.;
        let Some(video) = self.video.as_mut() else {
            return self.state();
        };

        if !(0. ..=video.duration_s()).contains(&target_s) {
            // Out of range is a steady state while scrubbing, not an error
            self.out_of_range = true;
            self.pending_seek_s = None;
            video.pause();
            return self.state();
        }
        self.out_of_range = false;
        if self
            .last_seek
            .is_none_or(|last| now.saturating_duration_since(last) >= self.seek_interval)
        {
            video.seek(target_s);
            self.last_seek = Some(now);
            self.pending_seek_s = None;
        } else {
            self.pending_seek_s = Some(target_s);
        }
        self.state()
    }

    /// Seeks the video directly. While locked the telemetry cursor follows.
    pub fn seek_video(&mut self, time_s: f64) -> Result<VideoSyncState, RacelogError> {
        let video = self.video.as_mut().ok_or(RacelogError::NoVideoLoaded)?;
        let target_s = time_s.clamp(0., video.duration_s());
        video.seek(target_s);
        let playing = video.is_playing();
        self.pending_seek_s = None;
        if self.locked {
            if let Some(index) =
                nearest_sample_index(&self.timestamps, target_s * 1000. + self.offset_ms)
            {
                self.telemetry_index = index;
            }
            self.out_of_range = false;
            // a paused video stops driving the cursor until it plays again
            self.syncing = playing;
        }
        Ok(self.state())
    }

    /// Moves the video by exactly one frame, only while unlocked
    pub fn step_frame(&mut self, step: FrameStep) -> Result<f64, RacelogError> {
        if self.locked {
            return Err(RacelogError::FrameStepWhileLocked);
        }
        let video = self.video.as_mut().ok_or(RacelogError::NoVideoLoaded)?;
        let fps = video.fps();
        if fps.is_nan() || fps <= 0. {
            return Err(RacelogError::InvalidUserInput {
                field: "fps".to_string(),
                reason: format!("video reports {} frames per second", fps),
            });
        }
        let frame_s = match step {
            FrameStep::Forward => 1. / fps,
            FrameStep::Backward => -1. / fps,
        };
        let target_s = (video.current_time_s() + frame_s).clamp(0., video.duration_s());
        video.seek(target_s);
        Ok(target_s)
    }

    pub fn play(&mut self) -> Result<(), RacelogError> {
        let video = self.video.as_mut().ok_or(RacelogError::NoVideoLoaded)?;
        video.play();
        self.out_of_range = false;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), RacelogError> {
        self.video
            .as_mut()
            .ok_or(RacelogError::NoVideoLoaded)?
            .pause();
        Ok(())
    }

    pub fn state(&self) -> VideoSyncState {
        VideoSyncState {
            offset_ms: self.offset_ms,
            locked: self.locked,
            playing: self.video.as_ref().is_some_and(|v| v.is_playing()),
            telemetry_index: self.telemetry_index,
            telemetry_time_ms: self.sample_time_ms(self.telemetry_index),
            video_time_ms: self.video.as_ref().map(|v| v.current_time_s() * 1000.),
            out_of_range: self.out_of_range,
        }
    }

    /// Ends the session: stops every frame loop and releases the video
    pub fn teardown(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.pause();
        }
        self.unload_video();
        self.locked = false;
    }

    pub fn to_record(&self, session_id: &str) -> SyncRecord {
        SyncRecord {
            session_id: session_id.to_string(),
            offset_ms: self.offset_ms,
            video_name: self.video.as_ref().map(|v| v.name().to_string()),
            video_path: self
                .video
                .as_ref()
                .and_then(|v| v.source())
                .map(|p| p.to_path_buf()),
        }
    }

    /// Applies a persisted record. When the video cannot be re-acquired the
    /// session carries on without one.
    pub fn restore<F>(&mut self, record: &SyncRecord, reacquire: F)
    where
        F: FnOnce(&SyncRecord) -> Option<V>,
    {
        self.offset_ms = record.offset_ms;
        if record.video_name.is_none() && record.video_path.is_none() {
            return;
        }
        match reacquire(record) {
            Some(video) => self.load_video(video),
            None => {
                warn!(
                    "Could not re-acquire video {:?} for session {}, continuing unsynced",
                    record.video_name, record.session_id
                );
                self.unload_video();
            }
        }
    }
}
