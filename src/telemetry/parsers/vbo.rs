// Racelogic VBOX text export (.vbo)
//
// Sections are introduced by `[name]` lines. Columns are declared in
// `[column names]` and rows follow `[data]`, separated by whitespace. Latitude
// and longitude are in arc-minutes, with longitude positive to the west.

use crate::errors::RacelogError;
use crate::telemetry::{
    ALTITUDE_CHANNEL, NormalizedSequence, SATELLITES_CHANNEL, SpeedUnit,
    normalize::{NormalizeConfig, RawFix, SequenceBuilder},
};

use super::{MidnightUnwrapper, columns, parse_hhmmss_ms};

/// Low bits of the satellite column hold the count, the high bits are DGPS flags
const SATELLITE_COUNT_MASK: u32 = 0x3f;

pub(super) fn detect(content: &str) -> bool {
    let lowered = content.to_ascii_lowercase();
    lowered.contains("[header]")
        && (lowered.contains("[data]") || lowered.contains("[column names]"))
}

#[derive(PartialEq)]
enum Section {
    Preamble,
    ColumnNames,
    Data,
    Other,
}

struct Columns {
    time: usize,
    lat: usize,
    lon: usize,
    speed: Option<usize>,
    heading: Option<usize>,
    aux: Vec<(usize, String)>,
    count: usize,
}

impl Columns {
    fn from_names(names: &[&str]) -> Option<Self> {
        let position = |wanted: &[&str]| {
            names
                .iter()
                .position(|n| wanted.contains(&n.to_ascii_lowercase().as_str()))
        };
        let time = position(&["time"])?;
        let lat = position(&["lat", "latitude"])?;
        let lon = position(&["long", "lon", "longitude"])?;
        let speed = position(&["velocity", "velocity kmh", "speed"]);
        let heading = position(&["heading"]);
        let used = [Some(time), Some(lat), Some(lon), speed, heading];
        let aux = names
            .iter()
            .enumerate()
            .filter(|(i, _)| !used.contains(&Some(*i)))
            .map(|(i, name)| {
                let channel = match name.to_ascii_lowercase().as_str() {
                    "sats" | "satellites" => SATELLITES_CHANNEL.to_string(),
                    "height" | "altitude" => ALTITUDE_CHANNEL.to_string(),
                    _ => columns::channel_name(name),
                };
                (i, channel)
            })
            .collect();
        Some(Self {
            time,
            lat,
            lon,
            speed,
            heading,
            aux,
            count: names.len(),
        })
    }
}

pub(super) fn parse(
    content: &str,
    config: &NormalizeConfig,
) -> Result<NormalizedSequence, RacelogError> {
    let mut builder = SequenceBuilder::new("VBOX", config);
    let mut clock = MidnightUnwrapper::default();
    let mut section = Section::Preamble;
    let mut layout: Option<Columns> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = match line.to_ascii_lowercase().as_str() {
                "[column names]" => Section::ColumnNames,
                "[data]" => Section::Data,
                _ => Section::Other,
            };
            continue;
        }
        match section {
            Section::ColumnNames if layout.is_none() => {
                let names: Vec<&str> = line.split_whitespace().collect();
                layout = Columns::from_names(&names);
            }
            Section::Data => {
                let Some(layout) = layout.as_ref() else {
                    return Err(RacelogError::MalformedLog {
                        format: "VBOX".to_string(),
                        reason: "data section without time, lat and long columns".to_string(),
                    });
                };
                if let Some(fix) = parse_row(line, layout, &mut clock) {
                    builder.push(fix);
                }
            }
            _ => {}
        }
    }
    builder.finish()
}

fn parse_row(line: &str, layout: &Columns, clock: &mut MidnightUnwrapper) -> Option<RawFix> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != layout.count {
        return None;
    }
    let number = |i: usize| tokens.get(i).and_then(|t| columns::parse_number(t));
    let time_of_day = parse_hhmmss_ms(tokens.get(layout.time)?)?;
    let lat_minutes = number(layout.lat)?;
    let lon_minutes_west = number(layout.lon)?;

    let mut channels = columns::collect_channels(
        &tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
        &layout.aux,
    );
    if let Some(sats) = channels.get_mut(SATELLITES_CHANNEL)
        && *sats >= 0.
    {
        *sats = f64::from((*sats as u32) & SATELLITE_COUNT_MASK);
    }

    Some(RawFix {
        time_ms: clock.unwrap(time_of_day),
        lat: lat_minutes / 60.,
        lon: -lon_minutes_west / 60.,
        speed_mps: layout
            .speed
            .and_then(number)
            .map(|kph| SpeedUnit::Kph.to_mps(kph)),
        heading_deg: layout.heading.and_then(number),
        channels,
    })
}
