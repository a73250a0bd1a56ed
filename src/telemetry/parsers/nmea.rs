// NMEA 0183 sentence logs. RMC and GGA sentences that share a UTC time are
// merged into one fix.

use std::collections::BTreeMap;

use crate::errors::RacelogError;
use crate::telemetry::{
    ALTITUDE_CHANNEL, HDOP_CHANNEL, NormalizedSequence, SATELLITES_CHANNEL, SpeedUnit,
    normalize::{NormalizeConfig, RawFix, SequenceBuilder},
};

use super::{MidnightUnwrapper, parse_degrees_minutes, parse_hhmmss_ms};

const DETECTION_LINES: usize = 20;

pub(super) fn detect(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(DETECTION_LINES)
        .any(|line| matches!(sentence_type(line), Some("RMC" | "GGA")))
}

/// `RMC` for `$GPRMC,...`, `$GNRMC,...` and so on
fn sentence_type(line: &str) -> Option<&str> {
    if !line.starts_with('$') {
        return None;
    }
    line.get(3..6)
}

/// Validates the `*hh` checksum when present
fn checksum_ok(line: &str) -> bool {
    let Some((body, checksum)) = line.trim_start_matches('$').split_once('*') else {
        return true;
    };
    let Ok(expected) = u8::from_str_radix(checksum.trim(), 16) else {
        return false;
    };
    body.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

/// Fix assembled from the sentences of one epoch
struct PendingFix {
    time_key: String,
    time_ms: f64,
    lat: Option<f64>,
    lon: Option<f64>,
    speed_mps: Option<f64>,
    heading_deg: Option<f64>,
    channels: BTreeMap<String, f64>,
    valid: bool,
}

impl PendingFix {
    fn new(time_key: &str, time_ms: f64) -> Self {
        Self {
            time_key: time_key.to_string(),
            time_ms,
            lat: None,
            lon: None,
            speed_mps: None,
            heading_deg: None,
            channels: BTreeMap::new(),
            valid: true,
        }
    }

    fn into_raw(self) -> Option<RawFix> {
        if !self.valid {
            return None;
        }
        Some(RawFix {
            time_ms: self.time_ms,
            lat: self.lat?,
            lon: self.lon?,
            speed_mps: self.speed_mps,
            heading_deg: self.heading_deg,
            channels: self.channels,
        })
    }
}

pub(super) fn parse(
    content: &str,
    config: &NormalizeConfig,
) -> Result<NormalizedSequence, RacelogError> {
    let mut builder = SequenceBuilder::new("NMEA", config);
    let mut clock = MidnightUnwrapper::default();
    let mut pending: Option<PendingFix> = None;

    for line in content.lines().map(str::trim) {
        let Some(kind) = sentence_type(line) else {
            continue;
        };
        if !matches!(kind, "RMC" | "GGA") || !checksum_ok(line) {
            continue;
        }
        let payload = line.split_once('*').map_or(line, |(body, _)| body);
        let fields: Vec<&str> = payload.split(',').collect();
        let Some(time_token) = fields.get(1).filter(|t| !t.is_empty()) else {
            continue;
        };
        let Some(time_of_day) = parse_hhmmss_ms(time_token) else {
            continue;
        };

        if pending.as_ref().is_none_or(|p| p.time_key != *time_token) {
            if let Some(fix) = pending.take().and_then(PendingFix::into_raw) {
                builder.push(fix);
            }
            pending = Some(PendingFix::new(time_token, clock.unwrap(time_of_day)));
        }
        let Some(fix) = pending.as_mut() else {
            continue;
        };

        match kind {
            "RMC" => apply_rmc(fix, &fields),
            _ => apply_gga(fix, &fields),
        }
    }
    if let Some(fix) = pending.and_then(PendingFix::into_raw) {
        builder.push(fix);
    }
    builder.finish()
}

// $GPRMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,speed_kn,course,ddmmyy,...
fn apply_rmc(fix: &mut PendingFix, fields: &[&str]) {
    if fields.get(2) != Some(&"A") {
        fix.valid = false;
        return;
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or("");
    fix.lat = parse_degrees_minutes(field(3), field(4)).or(fix.lat);
    fix.lon = parse_degrees_minutes(field(5), field(6)).or(fix.lon);
    if let Ok(knots) = field(7).parse::<f64>() {
        fix.speed_mps = Some(SpeedUnit::Knots.to_mps(knots));
    }
    if let Ok(course) = field(8).parse::<f64>() {
        fix.heading_deg = Some(course);
    }
}

// $GPGGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,quality,sats,hdop,altitude,M,...
fn apply_gga(fix: &mut PendingFix, fields: &[&str]) {
    let field = |i: usize| fields.get(i).copied().unwrap_or("");
    if matches!(field(6), "" | "0") {
        fix.valid = false;
        return;
    }
    fix.lat = fix.lat.or(parse_degrees_minutes(field(2), field(3)));
    fix.lon = fix.lon.or(parse_degrees_minutes(field(4), field(5)));
    for (index, channel) in [
        (7, SATELLITES_CHANNEL),
        (8, HDOP_CHANNEL),
        (9, ALTITUDE_CHANNEL),
    ] {
        if let Ok(value) = field(index).parse::<f64>() {
            fix.channels.insert(channel.to_string(), value);
        }
    }
}
