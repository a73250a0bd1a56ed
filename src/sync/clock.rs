use std::{
    path::{Path, PathBuf},
    time::Instant,
};

/// The video side of a sync session: whatever element or decoder plays the
/// onboard footage.
pub trait VideoClock {
    /// Identifying name persisted with the sync offset
    fn name(&self) -> &str;

    /// Where the video can be re-acquired from, if it came from a file
    fn source(&self) -> Option<&Path> {
        None
    }

    fn duration_s(&self) -> f64;
    fn current_time_s(&self) -> f64;
    fn fps(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn seek(&mut self, time_s: f64);
    fn play(&mut self);
    fn pause(&mut self);
}

/// A video clock that advances with wall time. Stands in for a real player in
/// replays and tests.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    name: String,
    source: Option<PathBuf>,
    duration_s: f64,
    fps: f64,
    /// Position when playback last started or was paused
    position_s: f64,
    started_at: Option<Instant>,
}

impl PlaybackClock {
    pub fn new(name: &str, duration_s: f64, fps: f64) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            duration_s: duration_s.max(0.),
            fps,
            position_s: 0.,
            started_at: None,
        }
    }

    pub fn with_source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_path_buf());
        self
    }
}

impl VideoClock for PlaybackClock {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn duration_s(&self) -> f64 {
        self.duration_s
    }

    fn current_time_s(&self) -> f64 {
        match self.started_at {
            Some(started) => {
                (self.position_s + started.elapsed().as_secs_f64()).min(self.duration_s)
            }
            None => self.position_s,
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn is_playing(&self) -> bool {
        self.started_at.is_some() && self.current_time_s() < self.duration_s
    }

    fn seek(&mut self, time_s: f64) {
        self.position_s = time_s.clamp(0., self.duration_s);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    fn play(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.position_s = self.current_time_s();
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_paused_clock_only_moves_on_seek() {
        let mut clock = PlaybackClock::new("onboard.mp4", 120., 30.);
        assert_eq!(clock.current_time_s(), 0.);
        clock.seek(42.5);
        assert_eq!(clock.current_time_s(), 42.5);
        clock.seek(500.);
        assert_eq!(clock.current_time_s(), 120.);
        clock.seek(-1.);
        assert_eq!(clock.current_time_s(), 0.);
        assert!(!clock.is_playing());
    }

    #[test]
    fn test_playing_clock_advances_and_pause_holds() {
        let mut clock = PlaybackClock::new("onboard.mp4", 120., 30.);
        clock.seek(10.);
        clock.play();
        assert!(clock.is_playing());
        thread::sleep(Duration::from_millis(20));
        clock.pause();
        let paused_at = clock.current_time_s();
        assert!(paused_at > 10.);
        thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.current_time_s(), paused_at);
    }

    #[test]
    fn test_source_path() {
        let clock = PlaybackClock::new("onboard.mp4", 1., 30.)
            .with_source(Path::new("/videos/onboard.mp4"));
        assert_eq!(clock.source(), Some(Path::new("/videos/onboard.mp4")));
    }
}
