use std::iter;

use log::debug;
use serde::{Deserialize, Serialize};
use simple_moving_average::{SMA, SumTreeSMA};

use crate::telemetry::{GeoPoint, Sample};

/// Samples in the light smoothing pass applied before looking for extrema
const SMOOTHING_WINDOW: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeedEventConfig {
    /// Smallest speed change from the previous extremum that counts as an event
    pub min_swing_mps: f64,
    /// Events closer together than this are not reported
    pub min_separation_ms: f64,
    /// Samples the reversal must persist for before the extremum is accepted
    pub debounce_samples: usize,
}

impl Default for SpeedEventConfig {
    fn default() -> Self {
        Self {
            min_swing_mps: 2.,
            min_separation_ms: 1500.,
            debounce_samples: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpeedEventKind {
    Peak,
    Valley,
}

impl SpeedEventKind {
    fn opposite(self) -> Self {
        match self {
            Self::Peak => Self::Valley,
            Self::Valley => Self::Peak,
        }
    }

    /// True when `value` lies further in this direction than `than`
    fn beyond(self, value: f64, than: f64) -> bool {
        match self {
            Self::Peak => value > than,
            Self::Valley => value < than,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeedEvent {
    pub kind: SpeedEventKind,
    /// Index into the sample window the detector was given
    pub index: usize,
    pub position: GeoPoint,
    pub time_ms: f64,
    /// Smoothed speed at the extremum
    pub speed_mps: f64,
}

/// Centered moving average of the speed channel, edges padded with the first
/// and last value
pub fn smooth_speeds(samples: &[Sample]) -> Vec<f64> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    let half = SMOOTHING_WINDOW / 2;
    let padded = iter::repeat_n(first.speed_mps, half)
        .chain(samples.iter().map(|s| s.speed_mps))
        .chain(iter::repeat_n(last.speed_mps, half));

    let mut window = SumTreeSMA::<f64, f64, SMOOTHING_WINDOW>::new();
    let mut smoothed = Vec::with_capacity(samples.len());
    for (i, speed) in padded.enumerate() {
        window.add_sample(speed);
        if i + 1 >= SMOOTHING_WINDOW {
            smoothed.push(window.get_average());
        }
    }
    smoothed
}

#[derive(Clone, Copy)]
struct Extremum {
    index: usize,
    value: f64,
}

/// Finds speed peaks and valleys in a sample window (a whole session or one
/// lap), alternating between the two kinds.
pub fn detect_speed_events(samples: &[Sample], config: &SpeedEventConfig) -> Vec<SpeedEvent> {
    let speeds = smooth_speeds(samples);
    let mut events: Vec<SpeedEvent> = Vec::new();
    let Some(&start) = speeds.first() else {
        return events;
    };
    // Direction is unknown until the speed first moves by a full swing
    let Some(first_move) = speeds
        .iter()
        .position(|v| (v - start).abs() >= config.min_swing_mps)
    else {
        return events;
    };
    let mut seeking = if speeds[first_move] > start {
        SpeedEventKind::Peak
    } else {
        SpeedEventKind::Valley
    };
    let extreme_in = |kind: SpeedEventKind, from: usize, to: usize| {
        (from..=to).fold(
            Extremum {
                index: from,
                value: speeds[from],
            },
            |best, i| {
                if kind.beyond(speeds[i], best.value) {
                    Extremum {
                        index: i,
                        value: speeds[i],
                    }
                } else {
                    best
                }
            },
        )
    };

    let make_event = |kind: SpeedEventKind, extremum: Extremum| SpeedEvent {
        kind,
        index: extremum.index,
        position: samples[extremum.index].position(),
        time_ms: samples[extremum.index].time_ms,
        speed_mps: extremum.value,
    };

    // The last accepted extremum, which the next one must swing away from
    let mut anchor = extreme_in(seeking.opposite(), 0, first_move);
    let mut anchor_emitted = false;
    let mut candidate = extreme_in(seeking, anchor.index, first_move);
    let mut reversal = 0;

    for (i, &speed) in speeds.iter().enumerate().skip(first_move + 1) {
        let current = Extremum { index: i, value: speed };
        if seeking.beyond(speed, candidate.value) {
            candidate = current;
            reversal = 0;
            continue;
        }
        if seeking.opposite().beyond(speed, anchor.value) {
            // The previous extremum was not the real one, move it
            anchor = current;
            candidate = current;
            reversal = 0;
            if anchor_emitted && let Some(last) = events.last_mut() {
                *last = make_event(seeking.opposite(), anchor);
            }
            continue;
        }
        if speed != candidate.value {
            reversal += 1;
        }
        if reversal < config.debounce_samples
            || (candidate.value - anchor.value).abs() < config.min_swing_mps
        {
            continue;
        }
        let time_ms = samples[candidate.index].time_ms;
        if events
            .last()
            .is_some_and(|last| time_ms - last.time_ms < config.min_separation_ms)
        {
            // Too close to the previous event; keep looking for a more extreme one
            continue;
        }
        events.push(make_event(seeking, candidate));
        anchor = candidate;
        anchor_emitted = true;
        seeking = seeking.opposite();
        candidate = extreme_in(seeking, anchor.index + 1, i);
        reversal = i - candidate.index;
    }

    debug!("Found {} speed events in {} samples", events.len(), samples.len());
    events
}
