use std::{
    ops::ControlFlow,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::errors::RacelogError;

use super::{
    clock::VideoClock,
    engine::{VideoSyncEngine, VideoSyncState},
};

/// Background thread calling [`VideoSyncEngine::frame`] once per tick.
///
/// The loop remembers the engine generation it was started under and exits as
/// soon as the engine moves past it (unlock, video change, teardown), when
/// stopped explicitly, or when `on_frame` breaks.
pub struct FrameLoop {
    handle: Option<JoinHandle<Result<(), RacelogError>>>,
    stop: Arc<AtomicBool>,
}

impl FrameLoop {
    pub fn spawn<V, F>(
        engine: Arc<Mutex<VideoSyncEngine<V>>>,
        tick: Duration,
        mut on_frame: F,
    ) -> Result<Self, RacelogError>
    where
        V: VideoClock + Send + 'static,
        F: FnMut(&VideoSyncState) -> ControlFlow<()> + Send + 'static,
    {
        let generation = engine
            .lock()
            .map_err(|_| RacelogError::FrameLoopPoisoned)?
            .generation();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::spawn(move || -> Result<(), RacelogError> {
            debug!("Frame loop started for generation {}", generation);
            loop {
                thread::sleep(tick);
                if thread_stop.load(Ordering::Relaxed) {
                    break;
                }
                let state = {
                    let mut engine = engine.lock().map_err(|_| RacelogError::FrameLoopPoisoned)?;
                    if !engine.is_current(generation) {
                        break;
                    }
                    engine.frame(Instant::now())
                };
                if on_frame(&state).is_break() {
                    break;
                }
            }
            debug!("Frame loop for generation {} finished", generation);
            Ok(())
        });

        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the loop to exit and reports how it ended
    pub fn join(mut self) -> Result<(), RacelogError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                warn!("Frame loop thread panicked");
                RacelogError::FrameLoopPoisoned
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::{PlaybackClock, SyncConfig};

    use super::*;

    fn shared_engine() -> Arc<Mutex<VideoSyncEngine<PlaybackClock>>> {
        let timestamps = (0..1000).map(|i| i as f64 * 100.).collect();
        let mut engine = VideoSyncEngine::new(timestamps, &SyncConfig::default()).unwrap();
        engine.load_video(PlaybackClock::new("onboard.mp4", 100., 30.));
        Arc::new(Mutex::new(engine))
    }

    #[test]
    fn test_loop_exits_when_callback_breaks() {
        let engine = shared_engine();
        let mut frames = 0;
        let frame_loop = FrameLoop::spawn(engine, Duration::from_millis(1), move |_| {
            frames += 1;
            if frames == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        frame_loop.join().unwrap();
    }

    #[test]
    fn test_unlock_cancels_loop() {
        let engine = shared_engine();
        engine.lock().unwrap().set_locked(true);
        let frame_loop = FrameLoop::spawn(engine.clone(), Duration::from_millis(1), |_| {
            ControlFlow::Continue(())
        })
        .unwrap();
        engine.lock().unwrap().set_locked(false);
        frame_loop.join().unwrap();
    }

    #[test]
    fn test_locked_playback_moves_cursor() {
        let engine = shared_engine();
        {
            let mut engine = engine.lock().unwrap();
            engine.set_locked(true);
            engine.seek_video(20.).unwrap();
            engine.play().unwrap();
        }
        let frame_loop = FrameLoop::spawn(engine.clone(), Duration::from_millis(2), |state| {
            if state.telemetry_index >= 200 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        frame_loop.join().unwrap();
        assert!(engine.lock().unwrap().state().telemetry_index >= 200);
    }
}
