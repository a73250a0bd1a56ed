// Splits a session into laps and sectors by timing-line crossings

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::telemetry::{Sample, normalize::haversine_m};

use super::course::{Course, TimingLine};

/// Fastest plausible lap, shorter "laps" are fix jitter around the line
const MIN_LAP_TIME_MS: f64 = 10_000.;
const MIN_SECTOR_TIME_MS: f64 = 2_000.;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LapConfig {
    /// A start/finish crossing sooner than this after the previous one is ignored
    pub min_lap_time_ms: f64,
    /// Same guard for sector lines, measured from the previous boundary of the lap
    pub min_sector_time_ms: f64,
}

impl Default for LapConfig {
    fn default() -> Self {
        Self {
            min_lap_time_ms: MIN_LAP_TIME_MS,
            min_sector_time_ms: MIN_SECTOR_TIME_MS,
        }
    }
}

/// A sector line crossing inside a lap
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SectorSplit {
    /// 1 for the first sector line, 2 for the second
    pub sector: usize,
    pub time_ms: f64,
    /// Time since the previous boundary (lap start or the first sector line)
    pub split_ms: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Lap {
    /// 1-based
    pub number: usize,
    /// First sample after the opening crossing
    pub start_index: usize,
    /// Last sample before the closing crossing
    pub end_index: usize,
    /// Interpolated crossing times
    pub start_time_ms: f64,
    pub end_time_ms: f64,
    pub lap_time_ms: f64,
    pub max_speed_mps: f64,
    pub min_speed_mps: f64,
    pub sectors: Vec<SectorSplit>,
}

impl Lap {
    /// Durations of the three sectors, when both sector lines were crossed in order
    pub fn sector_times_ms(&self) -> Option<[f64; 3]> {
        match self.sectors.as_slice() {
            [first, second] => Some([
                first.split_ms,
                second.split_ms,
                self.end_time_ms - second.time_ms,
            ]),
            _ => None,
        }
    }
}

struct OpenLap {
    start_index: usize,
    start_time_ms: f64,
    sectors: Vec<SectorSplit>,
}

impl OpenLap {
    fn last_boundary_ms(&self) -> f64 {
        self.sectors
            .last()
            .map_or(self.start_time_ms, |split| split.time_ms)
    }

    fn close(self, number: usize, end_index: usize, end_time_ms: f64, samples: &[Sample]) -> Lap {
        let speeds = samples
            .get(self.start_index..=end_index)
            .unwrap_or(&[])
            .iter()
            .map(|s| s.speed_mps);
        let (min_speed_mps, max_speed_mps) = speeds
            .minmax_by(|a, b| a.total_cmp(b))
            .into_option()
            .unwrap_or((0., 0.));
        Lap {
            number,
            start_index: self.start_index,
            end_index,
            start_time_ms: self.start_time_ms,
            end_time_ms,
            lap_time_ms: end_time_ms - self.start_time_ms,
            max_speed_mps,
            min_speed_mps,
            sectors: self.sectors,
        }
    }
}

/// Interpolated time at which the pair `(i, i + 1)` crosses `line`
fn crossing_time(line: &TimingLine, from: &Sample, to: &Sample) -> Option<(f64, f64)> {
    let fraction = line.crossing_fraction(from.position(), to.position())?;
    Some((fraction, from.time_ms + fraction * (to.time_ms - from.time_ms)))
}

/// Single forward pass emitting every completed lap. The first start/finish
/// crossing only opens lap 1 and a lap still open at the end is dropped.
pub fn detect_laps(samples: &[Sample], course: &Course, config: &LapConfig) -> Vec<Lap> {
    let Some(start_finish) = course.start_finish else {
        debug!("Course {} has no start/finish line, no laps", course.name);
        return Vec::new();
    };
    let sector_lines = course.sector_lines();

    let mut laps = Vec::new();
    let mut open: Option<OpenLap> = None;
    let mut last_crossing_ms: Option<f64> = None;

    for (i, (from, to)) in samples.iter().tuple_windows().enumerate() {
        if let Some((fraction, time_ms)) = crossing_time(&start_finish, from, to)
            && last_crossing_ms.is_none_or(|last| time_ms - last >= config.min_lap_time_ms)
        {
            if let Some(lap) = open.take() {
                laps.push(lap.close(laps.len() + 1, i, time_ms, samples));
            }
            open = Some(OpenLap {
                start_index: if fraction == 0. { i } else { i + 1 },
                start_time_ms: time_ms,
                sectors: Vec::new(),
            });
            last_crossing_ms = Some(time_ms);
            continue;
        }

        if let (Some(lines), Some(lap)) = (sector_lines.as_ref(), open.as_mut())
            && let Some(line) = lines.get(lap.sectors.len())
            && let Some((_, time_ms)) = crossing_time(line, from, to)
        {
            let split_ms = time_ms - lap.last_boundary_ms();
            if split_ms >= config.min_sector_time_ms {
                lap.sectors.push(SectorSplit {
                    sector: lap.sectors.len() + 1,
                    time_ms,
                    split_ms,
                });
            }
        }
    }

    info!("Detected {} laps on course {}", laps.len(), course.name);
    laps
}

pub fn fastest_lap(laps: &[Lap]) -> Option<&Lap> {
    laps.iter().min_by(|a, b| a.lap_time_ms.total_cmp(&b.lap_time_ms))
}

/// The samples belonging to a lap, empty if the lap does not index into `samples`
pub fn lap_samples<'s>(samples: &'s [Sample], lap: &Lap) -> &'s [Sample] {
    samples.get(lap.start_index..=lap.end_index).unwrap_or(&[])
}

pub fn lap_distance_m(samples: &[Sample], lap: &Lap) -> f64 {
    lap_samples(samples, lap)
        .iter()
        .tuple_windows()
        .map(|(a, b)| haversine_m(a.position(), b.position()))
        .sum()
}
