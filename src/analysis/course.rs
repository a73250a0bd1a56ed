// Track and course definitions, and the timing-line crossing test

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::errors::RacelogError;
use crate::telemetry::GeoPoint;

/// Cross products smaller than this are treated as parallel segments
const PARALLEL_EPSILON: f64 = 1e-18;

/// A timing line between two fixed endpoints
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimingLine {
    pub a: GeoPoint,
    pub b: GeoPoint,
}

impl TimingLine {
    pub fn new(a: GeoPoint, b: GeoPoint) -> Self {
        Self { a, b }
    }

    /// Where the moving segment `from -> to` crosses this line, as a fraction of
    /// the moving segment in `[0, 1)`. Coordinates are treated as planar, which
    /// holds over the few meters between two fixes.
    ///
    /// The interval is half-open so a crossing that lands exactly on a sample
    /// is reported once, by the pair starting at that sample.
    pub fn crossing_fraction(&self, from: GeoPoint, to: GeoPoint) -> Option<f64> {
        let r = (to.lon - from.lon, to.lat - from.lat);
        let s = (self.b.lon - self.a.lon, self.b.lat - self.a.lat);
        let denominator = cross(r, s);
        if denominator.abs() < PARALLEL_EPSILON {
            return None;
        }
        let offset = (self.a.lon - from.lon, self.a.lat - from.lat);
        let t = cross(offset, s) / denominator;
        let u = cross(offset, r) / denominator;
        ((0. ..1.).contains(&t) && (0. ..=1.).contains(&u)).then_some(t)
    }
}

fn cross(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.0 * b.1 - a.1 * b.0
}

/// One lap layout of a venue
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub name: String,
    /// A course without a start/finish line produces no laps
    #[serde(default)]
    pub start_finish: Option<TimingLine>,
    /// Either empty or exactly two lines; any other count is ignored for timing
    #[serde(default)]
    pub sectors: Vec<TimingLine>,
}

impl Course {
    pub fn new(name: &str, start_finish: TimingLine) -> Self {
        Self {
            name: name.to_string(),
            start_finish: Some(start_finish),
            sectors: Vec::new(),
        }
    }

    pub fn with_sectors(mut self, first: TimingLine, second: TimingLine) -> Self {
        self.sectors = vec![first, second];
        self
    }

    /// The sector lines when the course defines a usable pair
    pub fn sector_lines(&self) -> Option<[TimingLine; 2]> {
        match self.sectors.as_slice() {
            [first, second] => Some([*first, *second]),
            _ => None,
        }
    }
}

/// A venue with one or more course layouts
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub name: String,
    pub courses: Vec<Course>,
}

impl Track {
    pub fn from_file(path: &Path) -> Result<Self, RacelogError> {
        let content =
            fs::read_to_string(path).map_err(|e| RacelogError::CourseLoadError { source: e })?;
        serde_json::from_str(&content).map_err(|e| RacelogError::CourseParseError { source: e })
    }

    /// Looks a course up by name, case-insensitively. Without a name the first
    /// course is the default layout.
    pub fn course(&self, name: Option<&str>) -> Result<&Course, RacelogError> {
        let found = match name {
            Some(name) => self
                .courses
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name)),
            None => self.courses.first(),
        };
        found.ok_or_else(|| RacelogError::CourseNotFound {
            track: self.name.clone(),
            name: name.unwrap_or("<default>").to_string(),
        })
    }
}
