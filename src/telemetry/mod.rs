pub mod normalize;
pub mod parsers;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uom::si::f64::Velocity;
use uom::si::velocity::{kilometer_per_hour, knot, meter_per_second, mile_per_hour};

pub use normalize::{NormalizeConfig, SequenceBuilder};
pub use parsers::{LogFormat, ParsedLog, detect_format, parse_log};

/// Horizontal position accuracy in meters, lower is better
pub const ACCURACY_CHANNEL: &str = "accuracy";
/// Horizontal dilution of precision
pub const HDOP_CHANNEL: &str = "hdop";
pub const ALTITUDE_CHANNEL: &str = "altitude";
pub const SATELLITES_CHANNEL: &str = "satellites";

/// A WGS84 coordinate in decimal degrees
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One GPS fix after normalization
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Sample {
    /// Milliseconds since the first sample of the session
    pub time_ms: f64,
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Ground speed, m/s
    pub speed_mps: f64,
    /// Course over ground, degrees clockwise from north (0-360)
    pub heading_deg: Option<f64>,
    /// Auxiliary channels keyed by name (altitude, satellites, rpm, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, f64>,
}

impl Sample {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    pub fn speed_kph(&self) -> f64 {
        SpeedUnit::Kph.from_mps(self.speed_mps)
    }

    pub fn speed_mph(&self) -> f64 {
        SpeedUnit::Mph.from_mps(self.speed_mps)
    }

    pub fn channel(&self, name: &str) -> Option<f64> {
        self.channels.get(name).copied()
    }

    /// Horizontal accuracy estimate in meters, if the logger reported one
    pub fn accuracy_m(&self) -> Option<f64> {
        self.channel(ACCURACY_CHANNEL)
    }
}

/// Display unit for speeds. Samples always store m/s.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SpeedUnit {
    Mps,
    #[default]
    Kph,
    Mph,
    Knots,
}

impl SpeedUnit {
    pub fn from_mps(&self, speed_mps: f64) -> f64 {
        let velocity = Velocity::new::<meter_per_second>(speed_mps);
        match self {
            Self::Mps => velocity.get::<meter_per_second>(),
            Self::Kph => velocity.get::<kilometer_per_hour>(),
            Self::Mph => velocity.get::<mile_per_hour>(),
            Self::Knots => velocity.get::<knot>(),
        }
    }

    pub fn to_mps(&self, speed: f64) -> f64 {
        match self {
            Self::Mps => speed,
            Self::Kph => Velocity::new::<kilometer_per_hour>(speed).get::<meter_per_second>(),
            Self::Mph => Velocity::new::<mile_per_hour>(speed).get::<meter_per_second>(),
            Self::Knots => Velocity::new::<knot>(speed).get::<meter_per_second>(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Mps => "m/s",
            Self::Kph => "km/h",
            Self::Mph => "mph",
            Self::Knots => "kn",
        }
    }
}

/// Time-ordered samples produced by a parser, plus the names of every auxiliary
/// channel seen in the log.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct NormalizedSequence {
    pub samples: Vec<Sample>,
    pub channel_names: BTreeSet<String>,
}

impl NormalizedSequence {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.time_ms - first.time_ms,
            _ => 0.,
        }
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time_ms).collect()
    }

    /// Values of an auxiliary channel aligned to the sample index space
    pub fn channel(&self, name: &str) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.channel(name)).collect()
    }

    /// Mean interval between samples in Hz, 0 when there are fewer than two samples
    pub fn sample_rate_hz(&self) -> f64 {
        let duration = self.duration_ms();
        if self.samples.len() < 2 || duration <= 0. {
            return 0.;
        }
        (self.samples.len() - 1) as f64 * 1000. / duration
    }
}
