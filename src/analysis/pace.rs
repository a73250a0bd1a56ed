// Running time delta between a lap and a reference lap, matched by distance

use log::debug;
use serde::{Deserialize, Serialize};

use crate::telemetry::Sample;

use super::cumulative_distance_m;

/// Two series aligned to the current lap's samples. Entries are `None` where
/// the current lap has gone further than the reference ever did.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PaceComparison {
    /// Current elapsed time minus the reference's time at the same distance.
    /// Positive means slower than the reference.
    pub delta_ms: Vec<Option<f64>>,
    /// Reference speed at the same distance
    pub reference_speed_mps: Vec<Option<f64>>,
}

impl PaceComparison {
    /// Delta at the last comparable sample
    pub fn final_delta_ms(&self) -> Option<f64> {
        self.delta_ms.iter().rev().find_map(|d| *d)
    }
}

pub fn compare_pace(current: &[Sample], reference: &[Sample]) -> PaceComparison {
    let (Some(current_start), Some(reference_start)) = (current.first(), reference.first()) else {
        return PaceComparison {
            delta_ms: vec![None; current.len()],
            reference_speed_mps: vec![None; current.len()],
        };
    };
    let current_distance = cumulative_distance_m(current);
    let reference_distance = cumulative_distance_m(reference);

    let mut comparison = PaceComparison {
        delta_ms: Vec::with_capacity(current.len()),
        reference_speed_mps: Vec::with_capacity(current.len()),
    };
    for (sample, &distance) in current.iter().zip(&current_distance) {
        match reference_at(reference, &reference_distance, distance) {
            Some((time_ms, speed_mps)) => {
                let elapsed_ms = sample.time_ms - current_start.time_ms;
                comparison
                    .delta_ms
                    .push(Some(elapsed_ms - (time_ms - reference_start.time_ms)));
                comparison.reference_speed_mps.push(Some(speed_mps));
            }
            None => {
                comparison.delta_ms.push(None);
                comparison.reference_speed_mps.push(None);
            }
        }
    }
    debug!(
        "Compared {} samples against a {} sample reference, final delta {:?}",
        current.len(),
        reference.len(),
        comparison.final_delta_ms()
    );
    comparison
}

/// Reference time and speed at `distance`, interpolated between the two
/// reference samples that bracket it
fn reference_at(reference: &[Sample], distances: &[f64], distance: f64) -> Option<(f64, f64)> {
    let total = *distances.last()?;
    if distance > total {
        return None;
    }
    let upper = distances.partition_point(|&d| d < distance);
    if upper == 0 {
        let first = &reference[0];
        return Some((first.time_ms, first.speed_mps));
    }
    let (lower, upper) = (upper - 1, upper);
    let span = distances[upper] - distances[lower];
    let fraction = if span > 0. {
        (distance - distances[lower]) / span
    } else {
        0.
    };
    let lerp = |a: f64, b: f64| a + fraction * (b - a);
    Some((
        lerp(reference[lower].time_ms, reference[upper].time_ms),
        lerp(reference[lower].speed_mps, reference[upper].speed_mps),
    ))
}
