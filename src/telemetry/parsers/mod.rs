// Logger format detection and parsing
//
// Every supported format is a variant of `LogFormat`. Detection runs the variants
// in `DETECTION_ORDER`, most specific signature first, and the generic columnar
// heuristic last.

mod aim;
mod columns;
mod generic;
mod nmea;
mod racechrono;
mod trackaddict;
mod vbo;

use std::{fmt, fs, path::Path};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::RacelogError;

use super::{NormalizedSequence, normalize::NormalizeConfig};

/// Only this much of the file is inspected when sniffing the format
const DETECTION_PREFIX_BYTES: usize = 16 * 1024;
const DAY_MS: f64 = 86_400_000.;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogFormat {
    /// Racelogic VBOX text export
    Vbo,
    /// AiM Race Studio CSV export
    AimCsv,
    /// RaceChrono CSV export
    RaceChrono,
    /// RaceRender CSV as written by TrackAddict
    TrackAddict,
    /// NMEA 0183 sentence log
    Nmea,
    /// Any delimited file with recognizable latitude and longitude columns
    GenericCsv,
}

impl LogFormat {
    pub const DETECTION_ORDER: [LogFormat; 6] = [
        LogFormat::Vbo,
        LogFormat::AimCsv,
        LogFormat::RaceChrono,
        LogFormat::TrackAddict,
        LogFormat::Nmea,
        LogFormat::GenericCsv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Vbo => "VBOX",
            Self::AimCsv => "AiM CSV",
            Self::RaceChrono => "RaceChrono",
            Self::TrackAddict => "TrackAddict",
            Self::Nmea => "NMEA",
            Self::GenericCsv => "generic CSV",
        }
    }

    /// Sniffs the format from a content prefix
    pub fn detect(&self, content: &str) -> bool {
        let prefix = detection_prefix(content);
        match self {
            Self::Vbo => vbo::detect(prefix),
            Self::AimCsv => aim::detect(prefix),
            Self::RaceChrono => racechrono::detect(prefix),
            Self::TrackAddict => trackaddict::detect(prefix),
            Self::Nmea => nmea::detect(prefix),
            Self::GenericCsv => generic::detect(prefix),
        }
    }

    pub fn parse(
        &self,
        content: &str,
        config: &NormalizeConfig,
    ) -> Result<NormalizedSequence, RacelogError> {
        match self {
            Self::Vbo => vbo::parse(content, config),
            Self::AimCsv => aim::parse(content, config),
            Self::RaceChrono => racechrono::parse(content, config),
            Self::TrackAddict => trackaddict::parse(content, config),
            Self::Nmea => nmea::parse(content, config),
            Self::GenericCsv => generic::parse(content, config),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed log together with the format it was recognized as
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLog {
    pub format: LogFormat,
    pub sequence: NormalizedSequence,
}

pub fn detect_format(content: &str) -> Option<LogFormat> {
    LogFormat::DETECTION_ORDER
        .into_iter()
        .find(|format| format.detect(content))
}

/// Detects the format of raw log bytes and parses them
pub fn parse_log(bytes: &[u8], config: &NormalizeConfig) -> Result<ParsedLog, RacelogError> {
    let content = String::from_utf8_lossy(bytes);
    let format = detect_format(&content).ok_or(RacelogError::UnrecognizedFormat)?;
    debug!("Detected {} log format", format);
    let sequence = format.parse(&content, config)?;
    Ok(ParsedLog { format, sequence })
}

pub fn parse_file(path: &Path, config: &NormalizeConfig) -> Result<ParsedLog, RacelogError> {
    let bytes = fs::read(path).map_err(|e| RacelogError::LogReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    let parsed = parse_log(&bytes, config)?;
    info!(
        "Loaded {:?} as {}: {} samples over {:.1}s, channels {:?}",
        path,
        parsed.format,
        parsed.sequence.len(),
        parsed.sequence.duration_ms() / 1000.,
        parsed.sequence.channel_names
    );
    Ok(parsed)
}

fn detection_prefix(content: &str) -> &str {
    if content.len() <= DETECTION_PREFIX_BYTES {
        return content;
    }
    let mut end = DETECTION_PREFIX_BYTES;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Parses `hhmmss` or `hhmmss.sss` time of day into milliseconds since midnight
pub(crate) fn parse_hhmmss_ms(token: &str) -> Option<f64> {
    let value: f64 = token.trim().trim_start_matches('+').parse().ok()?;
    if !value.is_finite() || !(0. ..240_000.).contains(&value) {
        return None;
    }
    let hours = (value / 10_000.).floor();
    let minutes = ((value - hours * 10_000.) / 100.).floor();
    let seconds = value - hours * 10_000. - minutes * 100.;
    if hours >= 24. || minutes >= 60. || seconds >= 61. {
        return None;
    }
    Some(((hours * 60. + minutes) * 60. + seconds) * 1000.)
}

/// Parses `hh:mm:ss.sss` or `mm:ss.sss` into milliseconds
pub(crate) fn parse_clock_ms(token: &str) -> Option<f64> {
    let parts = token
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;
    let seconds = match parts.as_slice() {
        [h, m, s] => (h * 60. + m) * 60. + s,
        [m, s] => m * 60. + s,
        _ => return None,
    };
    (seconds.is_finite() && seconds >= 0.).then_some(seconds * 1000.)
}

/// Converts an NMEA style `dddmm.mmmm` value plus hemisphere into decimal degrees
pub(crate) fn parse_degrees_minutes(value: &str, hemisphere: &str) -> Option<f64> {
    let raw: f64 = value.trim().parse().ok()?;
    if !raw.is_finite() || raw < 0. {
        return None;
    }
    let degrees = (raw / 100.).floor();
    let minutes = raw - degrees * 100.;
    if minutes >= 60. {
        return None;
    }
    let decimal = degrees + minutes / 60.;
    match hemisphere.trim() {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

/// Interprets a number as a unix timestamp in seconds or milliseconds when its
/// magnitude is plausible for either (years 2001 to 2286), returning milliseconds
pub(crate) fn plausible_unix_ms(value: f64) -> Option<f64> {
    if (1e9..1e10).contains(&value) {
        Some(value * 1000.)
    } else if (1e12..1e13).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Turns a time-of-day clock that wraps at midnight into a monotonic one
#[derive(Default)]
pub(crate) struct MidnightUnwrapper {
    prev_ms: Option<f64>,
    day_offset_ms: f64,
}

impl MidnightUnwrapper {
    pub(crate) fn unwrap(&mut self, time_of_day_ms: f64) -> f64 {
        if let Some(prev) = self.prev_ms
            && time_of_day_ms + DAY_MS / 2. < prev
        {
            self.day_offset_ms += DAY_MS;
        }
        self.prev_ms = Some(time_of_day_ms);
        time_of_day_ms + self.day_offset_ms
    }
}
