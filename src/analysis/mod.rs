// Derived computations over a normalized sample sequence. Everything in here is a
// pure function of samples plus an explicit config value.

pub mod braking;
pub mod course;
pub mod gforce;
pub mod laps;
pub mod pace;
pub mod speed_events;

use crate::telemetry::{Sample, normalize::haversine_m};

pub use braking::{BrakingConfig, BrakingZone, ZoneEdge, detect_braking_zones};
pub use course::{Course, TimingLine, Track};
pub use gforce::{DerivativeMethod, DerivedChannels, GForceConfig, compute_g_forces};
pub use laps::{Lap, LapConfig, SectorSplit, detect_laps, fastest_lap, lap_distance_m, lap_samples};
pub use pace::{PaceComparison, compare_pace};
pub use speed_events::{SpeedEvent, SpeedEventConfig, SpeedEventKind, detect_speed_events};

/// Average over a window centered on each value. The window shrinks at the ends
/// instead of padding.
pub(crate) fn centered_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    if half == 0 {
        return values.to_vec();
    }
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            let slice = &values[start..end];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Distance traveled from the first sample, meters, one entry per sample
pub fn cumulative_distance_m(samples: &[Sample]) -> Vec<f64> {
    let mut total = 0.;
    let mut distances = Vec::with_capacity(samples.len());
    for (i, sample) in samples.iter().enumerate() {
        if i > 0 {
            total += haversine_m(samples[i - 1].position(), sample.position());
        }
        distances.push(total);
    }
    distances
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_moving_average() {
        let smoothed = centered_moving_average(&[0., 0., 3., 0., 0.], 3);
        assert_eq!(smoothed, vec![0., 1., 1., 1., 0.]);
        assert_eq!(centered_moving_average(&[1., 2.], 1), vec![1., 2.]);
        assert!(centered_moving_average(&[], 5).is_empty());
    }

    #[test]
    fn test_cumulative_distance() {
        let samples: Vec<Sample> = (0..3)
            .map(|i| Sample {
                lat: 45. + i as f64 * 0.001,
                lon: 9.,
                ..Default::default()
            })
            .collect();
        let distances = cumulative_distance_m(&samples);
        assert_eq!(distances[0], 0.);
        assert!((distances[2] - 2. * distances[1]).abs() < 1e-6);
        assert!((distances[1] - 111.19).abs() < 0.1);
    }
}
