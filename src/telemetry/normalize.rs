// Shared geodesy helpers and the row validation every parser runs its fixes through

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::RacelogError;

use super::{GeoPoint, NormalizedSequence, Sample};

pub const EARTH_RADIUS_M: f64 = 6_371_000.;
/// Ceiling for a logged ground speed, anything above is a corrupt row
pub const MAX_PLAUSIBLE_SPEED_MPS: f64 = 150.;
/// Ground speed implied between two fixes above which the newer fix is a glitch
pub const MAX_IMPLIED_SPEED_MPS: f64 = 200.;
/// Jumps shorter than this are never treated as teleports, whatever the time gap
pub const TELEPORT_DISTANCE_FLOOR_M: f64 = 50.;
/// Minimum movement before a bearing between two fixes is trusted as heading
const MIN_HEADING_DISTANCE_M: f64 = 1.;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizeConfig {
    pub max_speed_mps: f64,
    pub max_implied_speed_mps: f64,
    pub teleport_floor_m: f64,
    /// Fill missing speed from distance over time between consecutive fixes
    pub derive_missing_speed: bool,
    /// Fill missing heading from the bearing between consecutive fixes
    pub derive_missing_heading: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: MAX_PLAUSIBLE_SPEED_MPS,
            max_implied_speed_mps: MAX_IMPLIED_SPEED_MPS,
            teleport_floor_m: TELEPORT_DISTANCE_FLOOR_M,
            derive_missing_speed: true,
            derive_missing_heading: true,
        }
    }
}

/// Great-circle distance in meters
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.).sin().powi(2);
    2. * EARTH_RADIUS_M * h.sqrt().atan2((1. - h).sqrt())
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in [0, 360)
pub fn bearing_deg(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = (to.lon - from.lon).to_radians();
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.)
}

/// Shortest signed angle from `from` to `to`, in [-180, 180). Positive is clockwise.
pub fn heading_delta_deg(from: f64, to: f64) -> f64 {
    (to - from + 180.).rem_euclid(360.) - 180.
}

pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && lat.abs() <= 90.
        && lon.abs() <= 180.
        && !(lat == 0. && lon == 0.)
}

/// True when moving `distance_m` in `dt_ms` is physically impossible for a car.
pub fn implies_teleport(distance_m: f64, dt_ms: f64, config: &NormalizeConfig) -> bool {
    if distance_m <= config.teleport_floor_m {
        return false;
    }
    if dt_ms <= 0. {
        return true;
    }
    distance_m / (dt_ms / 1000.) > config.max_implied_speed_mps
}

/// Teleportation test between the last accepted sample and a candidate
pub fn is_teleport(prev: &Sample, next: &Sample, config: &NormalizeConfig) -> bool {
    implies_teleport(
        haversine_m(prev.position(), next.position()),
        next.time_ms - prev.time_ms,
        config,
    )
}

/// One row as decoded by a parser, before validation. `time_ms` may be on any
/// monotonic clock (time of day, unix epoch, elapsed); the builder rebases it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFix {
    pub time_ms: f64,
    pub lat: f64,
    pub lon: f64,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub channels: BTreeMap<String, f64>,
}

/// Accumulates validated samples for one parse. Malformed, out-of-range,
/// out-of-order and teleporting rows are dropped silently.
pub struct SequenceBuilder<'a> {
    format: &'static str,
    config: &'a NormalizeConfig,
    origin_ms: Option<f64>,
    samples: Vec<Sample>,
    channel_names: BTreeSet<String>,
    rejected: usize,
}

impl<'a> SequenceBuilder<'a> {
    pub fn new(format: &'static str, config: &'a NormalizeConfig) -> Self {
        Self {
            format,
            config,
            origin_ms: None,
            samples: Vec::new(),
            channel_names: BTreeSet::new(),
            rejected: 0,
        }
    }

    pub fn accepted(&self) -> usize {
        self.samples.len()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Validates and appends a fix, returns whether it was kept
    pub fn push(&mut self, fix: RawFix) -> bool {
        let accepted = self.try_push(fix);
        if !accepted {
            self.rejected += 1;
        }
        accepted
    }

    fn try_push(&mut self, fix: RawFix) -> bool {
        if !fix.time_ms.is_finite() || !is_valid_coordinate(fix.lat, fix.lon) {
            return false;
        }
        if let Some(speed) = fix.speed_mps
            && (!speed.is_finite() || speed < 0. || speed > self.config.max_speed_mps)
        {
            return false;
        }

        let origin = *self.origin_ms.get_or_insert(fix.time_ms);
        let mut sample = Sample {
            time_ms: fix.time_ms - origin,
            lat: fix.lat,
            lon: fix.lon,
            speed_mps: fix.speed_mps.unwrap_or(0.),
            heading_deg: fix
                .heading_deg
                .filter(|h| h.is_finite())
                .map(|h| h.rem_euclid(360.)),
            channels: fix.channels,
        };

        if let Some(prev) = self.samples.last() {
            if sample.time_ms < prev.time_ms || is_teleport(prev, &sample, self.config) {
                return false;
            }
            let distance = haversine_m(prev.position(), sample.position());
            let dt_s = (sample.time_ms - prev.time_ms) / 1000.;
            if fix.speed_mps.is_none() && self.config.derive_missing_speed {
                sample.speed_mps = if dt_s > 0. {
                    distance / dt_s
                } else {
                    prev.speed_mps
                };
                if sample.speed_mps > self.config.max_speed_mps {
                    return false;
                }
            }
            if sample.heading_deg.is_none() && self.config.derive_missing_heading {
                sample.heading_deg = if distance > MIN_HEADING_DISTANCE_M {
                    Some(bearing_deg(prev.position(), sample.position()))
                } else {
                    prev.heading_deg
                };
            }
        }

        self.channel_names.extend(sample.channels.keys().cloned());
        self.samples.push(sample);
        true
    }

    pub fn finish(self) -> Result<NormalizedSequence, RacelogError> {
        debug!(
            "{}: accepted {} samples, rejected {} rows",
            self.format,
            self.samples.len(),
            self.rejected
        );
        if self.samples.is_empty() {
            return Err(RacelogError::NoValidSamples {
                format: self.format.to_string(),
            });
        }
        Ok(NormalizedSequence {
            samples: self.samples,
            channel_names: self.channel_names,
        })
    }
}
