use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::telemetry::{GeoPoint, Sample, normalize::haversine_m};

use super::gforce::{GRAVITY_MPS2, MAX_DT_MS, MIN_DT_MS};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrakingConfig {
    /// Smoothed g below this opens a zone. Negative.
    pub entry_g: f64,
    /// Smoothed g above this closes it. Less negative than `entry_g`.
    pub exit_g: f64,
    /// Shorter zones are noise
    pub min_duration_ms: f64,
    /// Exponential smoothing factor, 1 disables smoothing
    pub alpha: f64,
    pub min_dt_ms: f64,
    pub max_dt_ms: f64,
}

impl Default for BrakingConfig {
    fn default() -> Self {
        Self {
            entry_g: -0.25,
            exit_g: -0.10,
            min_duration_ms: 500.,
            alpha: 0.3,
            min_dt_ms: MIN_DT_MS,
            max_dt_ms: MAX_DT_MS,
        }
    }
}

/// Snapshot of the sample at either end of a zone
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ZoneEdge {
    pub index: usize,
    pub position: GeoPoint,
    pub time_ms: f64,
    pub speed_mps: f64,
}

impl ZoneEdge {
    fn at(samples: &[Sample], index: usize) -> Self {
        let sample = &samples[index];
        Self {
            index,
            position: sample.position(),
            time_ms: sample.time_ms,
            speed_mps: sample.speed_mps,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BrakingZone {
    pub start: ZoneEdge,
    pub end: ZoneEdge,
    /// Every fix from start to end, inclusive
    pub path: Vec<GeoPoint>,
    pub speed_lost_mps: f64,
    /// Most negative smoothed deceleration inside the zone, g
    pub peak_decel_g: f64,
    pub distance_m: f64,
}

impl BrakingZone {
    pub fn duration_ms(&self) -> f64 {
        self.end.time_ms - self.start.time_ms
    }
}

#[derive(Clone, Copy)]
enum State {
    Coasting,
    Braking { start: usize, peak_g: f64 },
}

/// Hysteresis detector over the longitudinal deceleration between consecutive
/// samples. See [`BrakingConfig`] for the thresholds.
pub fn detect_braking_zones(samples: &[Sample], config: &BrakingConfig) -> Vec<BrakingZone> {
    let mut zones = Vec::new();
    let mut state = State::Coasting;
    let mut smoothed: Option<f64> = None;

    let close = |start: usize, end: usize, peak_g: f64, zones: &mut Vec<BrakingZone>| {
        let zone = build_zone(samples, start, end, peak_g);
        if zone.duration_ms() >= config.min_duration_ms {
            zones.push(zone);
        } else {
            debug!(
                "Dropping {:.0}ms braking zone at sample {}",
                zone.duration_ms(),
                start
            );
        }
    };

    for (i, (prev, current)) in samples.iter().tuple_windows().enumerate() {
        let dt_ms = current.time_ms - prev.time_ms;
        if dt_ms < config.min_dt_ms || dt_ms > config.max_dt_ms {
            // Never span a gap: end at the last good sample and start smoothing over
            if let State::Braking { start, peak_g } = state {
                close(start, i, peak_g, &mut zones);
            }
            state = State::Coasting;
            smoothed = None;
            continue;
        }

        let raw_g = (current.speed_mps - prev.speed_mps) / (dt_ms / 1000.) / GRAVITY_MPS2;
        let g = smoothed.map_or(raw_g, |prev_g| {
            config.alpha * raw_g + (1. - config.alpha) * prev_g
        });
        smoothed = Some(g);

        state = match state {
            State::Coasting if g < config.entry_g => State::Braking {
                start: i,
                peak_g: g,
            },
            State::Braking { start, peak_g } if g > config.exit_g => {
                close(start, i, peak_g, &mut zones);
                State::Coasting
            }
            State::Braking { start, peak_g } => State::Braking {
                start,
                peak_g: peak_g.min(g),
            },
            coasting => coasting,
        };
    }

    if let State::Braking { start, peak_g } = state {
        close(start, samples.len() - 1, peak_g, &mut zones);
    }
    debug!("Found {} braking zones", zones.len());
    zones
}

fn build_zone(samples: &[Sample], start: usize, end: usize, peak_decel_g: f64) -> BrakingZone {
    let path: Vec<GeoPoint> = samples[start..=end].iter().map(Sample::position).collect();
    let distance_m = path
        .iter()
        .tuple_windows()
        .map(|(a, b)| haversine_m(*a, *b))
        .sum();
    let start = ZoneEdge::at(samples, start);
    let end = ZoneEdge::at(samples, end);
    BrakingZone {
        speed_lost_mps: start.speed_mps - end.speed_mps,
        start,
        end,
        path,
        peak_decel_g,
        distance_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT_MS: f64 = 100.;

    /// Samples at 10 Hz whose consecutive speeds produce exactly the given g values
    fn samples_with_decel(start_speed: f64, g_per_step: &[f64]) -> Vec<Sample> {
        let mut speed = start_speed;
        let mut samples = vec![Sample {
            time_ms: 0.,
            lat: 45.,
            lon: 9.,
            speed_mps: speed,
            ..Default::default()
        }];
        for (i, g) in g_per_step.iter().enumerate() {
            speed += g * GRAVITY_MPS2 * DT_MS / 1000.;
            samples.push(Sample {
                time_ms: (i + 1) as f64 * DT_MS,
                lat: 45.,
                lon: 9. + (i + 1) as f64 * 2e-5,
                speed_mps: speed,
                ..Default::default()
            });
        }
        samples
    }

    fn unsmoothed() -> BrakingConfig {
        BrakingConfig {
            alpha: 1.,
            ..Default::default()
        }
    }

    #[test]
    fn test_between_thresholds_never_opens() {
        let samples = samples_with_decel(40., &[-0.2; 30]);
        assert!(detect_braking_zones(&samples, &unsmoothed()).is_empty());
    }

    #[test]
    fn test_no_flicker_around_entry() {
        // crosses the entry threshold repeatedly without ever recovering past exit
        let mut pattern = vec![0.; 3];
        for _ in 0..6 {
            pattern.extend([-0.3, -0.2]);
        }
        pattern.extend([0.; 3]);
        let samples = samples_with_decel(40., &pattern);
        let zones = detect_braking_zones(&samples, &unsmoothed());
        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.start.index, 3);
        assert_eq!(zone.end.index, 15);
        assert!((zone.peak_decel_g + 0.3).abs() < 1e-9);
        assert!((zone.speed_lost_mps - 6. * 0.5 * GRAVITY_MPS2 * 0.1).abs() < 1e-9);
        assert_eq!(zone.path.len(), 13);
        assert!(zone.distance_m > 0.);
    }

    #[test]
    fn test_minimum_duration() {
        // 300ms of hard braking is dropped
        let mut short = vec![0.; 3];
        short.extend([-0.8; 3]);
        short.extend([0.; 3]);
        assert!(detect_braking_zones(&samples_with_decel(40., &short), &unsmoothed()).is_empty());

        // the same dip held for a second is one zone
        let mut long = vec![0.; 3];
        long.extend([-0.8; 10]);
        long.extend([0.; 3]);
        let zones = detect_braking_zones(&samples_with_decel(40., &long), &unsmoothed());
        assert_eq!(zones.len(), 1);
        assert!((zones[0].duration_ms() - 1000.).abs() < 1e-9);
    }

    #[test]
    fn test_gap_closes_zone_at_last_valid_sample() {
        let mut samples = samples_with_decel(40., &[0., -0.8, -0.8, -0.8, -0.8, -0.8, -0.8, -0.8]);
        let resume = samples.last().cloned().unwrap();
        for i in 1..=3 {
            samples.push(Sample {
                time_ms: resume.time_ms + 5000. + i as f64 * DT_MS,
                speed_mps: resume.speed_mps - i as f64,
                lon: resume.lon + 0.001,
                ..resume.clone()
            });
        }
        let zones = detect_braking_zones(&samples, &unsmoothed());
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].start.index, 1);
        assert_eq!(zones[0].end.index, 8);
        // the samples after the gap are braking too, but only 200ms worth
    }

    #[test]
    fn test_zone_open_at_the_end_is_closed() {
        let samples = samples_with_decel(40., &[0., -0.5, -0.5, -0.5, -0.5, -0.5, -0.5]);
        let zones = detect_braking_zones(&samples, &unsmoothed());
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].end.index, samples.len() - 1);
    }

    #[test]
    fn test_smoothing_delays_entry() {
        let mut pattern = vec![0.; 3];
        pattern.extend([-0.5; 12]);
        pattern.extend([0.; 5]);
        let samples = samples_with_decel(40., &pattern);
        let raw = detect_braking_zones(&samples, &unsmoothed());
        let smoothed = detect_braking_zones(&samples, &BrakingConfig::default());
        assert_eq!(raw.len(), 1);
        assert_eq!(smoothed.len(), 1);
        assert!(smoothed[0].start.index > raw[0].start.index);
        assert!(smoothed[0].peak_decel_g > raw[0].peak_decel_g);
    }
}
