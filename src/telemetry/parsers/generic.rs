// Fallback for any delimited log with recognizable latitude and longitude
//
// The delimiter is sniffed from the first content line, columns are found by
// header alias and the time encoding is worked out value by value. Headerless
// files whose rows start with a unix timestamp are read as
// `time,lat,lon,speed[,heading]`.

use crate::errors::RacelogError;
use crate::telemetry::{
    NormalizedSequence, SpeedUnit,
    normalize::{NormalizeConfig, RawFix, SequenceBuilder},
};

use super::{
    MidnightUnwrapper,
    columns::{self, ColumnMap},
    parse_clock_ms, parse_hhmmss_ms, plausible_unix_ms,
};

/// How the header says time is encoded, when it says anything
#[derive(Clone, Copy, Debug, PartialEq)]
enum TimeHint {
    Seconds,
    Milliseconds,
    TimeOfDay,
}

impl TimeHint {
    fn from_header(header: &str) -> Self {
        let lowered = header.to_lowercase();
        if lowered.contains("utc") || lowered.contains("gps time") {
            Self::TimeOfDay
        } else if lowered.contains("(ms)") || lowered.ends_with("_ms") || lowered.ends_with(" ms") {
            Self::Milliseconds
        } else {
            Self::Seconds
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum DecodedTime {
    /// Already on a monotonic clock
    Absolute(f64),
    /// Milliseconds since midnight, may wrap
    TimeOfDay(f64),
}

fn decode_time(token: &str, hint: TimeHint) -> Option<DecodedTime> {
    let token = token.trim().trim_matches('"');
    if token.contains(':') {
        // `2023-04-11 10:02:00.100` and `2023-04-11T10:02:00.100Z` keep the clock part
        let clock = token
            .rsplit([' ', 'T'])
            .next()
            .unwrap_or(token)
            .trim_end_matches('Z');
        return parse_clock_ms(clock).map(DecodedTime::TimeOfDay);
    }
    let value = columns::parse_number(token)?;
    if let Some(unix_ms) = plausible_unix_ms(value) {
        return Some(DecodedTime::Absolute(unix_ms));
    }
    match hint {
        TimeHint::TimeOfDay => parse_hhmmss_ms(token).map(DecodedTime::TimeOfDay),
        TimeHint::Milliseconds => Some(DecodedTime::Absolute(value)),
        TimeHint::Seconds => Some(DecodedTime::Absolute(value * 1000.)),
    }
}

pub(super) fn detect(content: &str) -> bool {
    let Some(first) = columns::first_content_line(content) else {
        return false;
    };
    let delimiter = columns::sniff_delimiter(first);
    let rows = columns::read_rows(content, delimiter);
    let Some(first_row) = rows.first() else {
        return false;
    };
    let header = ColumnMap::new(first_row);
    if header.find(columns::LATITUDE_ALIASES).is_some()
        && header.find(columns::LONGITUDE_ALIASES).is_some()
    {
        return true;
    }
    is_headerless_row(first_row)
}

fn is_headerless_row(row: &[String]) -> bool {
    row.len() >= 3
        && columns::number_at(row, Some(0))
            .and_then(plausible_unix_ms)
            .is_some()
        && columns::number_at(row, Some(1)).is_some()
        && columns::number_at(row, Some(2)).is_some()
}

/// Column positions resolved for one file
struct Layout {
    time: Option<usize>,
    lat: Option<usize>,
    lon: Option<usize>,
    speed: Option<usize>,
    heading: Option<usize>,
    time_hint: TimeHint,
    speed_unit: SpeedUnit,
    aux: Vec<(usize, String)>,
}

impl Layout {
    fn from_header(header: &ColumnMap) -> Self {
        let time = header.find(columns::TIME_ALIASES);
        let lat = header.find(columns::LATITUDE_ALIASES);
        let lon = header.find(columns::LONGITUDE_ALIASES);
        let speed = header.find(columns::SPEED_ALIASES);
        let heading = header.find(columns::HEADING_ALIASES);
        let label = |index: Option<usize>| index.and_then(|i| header.header(i));
        Self {
            time,
            lat,
            lon,
            speed,
            heading,
            time_hint: label(time).map_or(TimeHint::Seconds, TimeHint::from_header),
            speed_unit: label(speed)
                .and_then(columns::speed_unit_from_label)
                .unwrap_or(SpeedUnit::Kph),
            aux: header.aux_columns(&[time, lat, lon, speed, heading]),
        }
    }

    fn headerless(width: usize) -> Self {
        Self {
            time: Some(0),
            lat: Some(1),
            lon: Some(2),
            speed: (width > 3).then_some(3),
            heading: (width > 4).then_some(4),
            time_hint: TimeHint::Seconds,
            speed_unit: SpeedUnit::Kph,
            aux: Vec::new(),
        }
    }
}

pub(super) fn parse(
    content: &str,
    config: &NormalizeConfig,
) -> Result<NormalizedSequence, RacelogError> {
    let delimiter = columns::first_content_line(content).map_or(b',', columns::sniff_delimiter);
    let rows = columns::read_rows(content, delimiter);
    let Some(first_row) = rows.first() else {
        return Err(RacelogError::NoValidSamples {
            format: "generic CSV".to_string(),
        });
    };

    let (layout, data) = if is_headerless_row(first_row) {
        (Layout::headerless(first_row.len()), &rows[..])
    } else {
        (Layout::from_header(&ColumnMap::new(first_row)), &rows[1..])
    };
    if layout.lat.is_none() || layout.lon.is_none() {
        return Err(RacelogError::MalformedLog {
            format: "generic CSV".to_string(),
            reason: "no latitude and longitude columns".to_string(),
        });
    }

    let mut builder = SequenceBuilder::new("generic CSV", config);
    let mut clock = MidnightUnwrapper::default();
    for (index, row) in data.iter().enumerate() {
        let (Some(lat), Some(lon)) = (
            columns::number_at(row, layout.lat),
            columns::number_at(row, layout.lon),
        ) else {
            continue;
        };
        // Without a time column rows are taken to be one second apart
        let time_ms = match layout.time {
            Some(_) => match columns::cell(row, layout.time)
                .and_then(|token| decode_time(token, layout.time_hint))
            {
                Some(DecodedTime::Absolute(ms)) => ms,
                Some(DecodedTime::TimeOfDay(ms)) => clock.unwrap(ms),
                None => continue,
            },
            None => index as f64 * 1000.,
        };
        builder.push(RawFix {
            time_ms,
            lat,
            lon,
            speed_mps: columns::number_at(row, layout.speed).map(|v| layout.speed_unit.to_mps(v)),
            heading_deg: columns::number_at(row, layout.heading),
            channels: columns::collect_channels(row, &layout.aux),
        });
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_time_encodings() {
        assert_eq!(
            decode_time("1681207320.5", TimeHint::Seconds),
            Some(DecodedTime::Absolute(1_681_207_320_500.))
        );
        assert_eq!(
            decode_time("12.5", TimeHint::Seconds),
            Some(DecodedTime::Absolute(12_500.))
        );
        assert_eq!(
            decode_time("250", TimeHint::Milliseconds),
            Some(DecodedTime::Absolute(250.))
        );
        assert_eq!(
            decode_time("2023-04-11T10:02:03.5Z", TimeHint::Seconds),
            Some(DecodedTime::TimeOfDay(36_123_500.))
        );
        assert_eq!(
            decode_time("100203.5", TimeHint::TimeOfDay),
            Some(DecodedTime::TimeOfDay(36_123_500.))
        );
        assert_eq!(decode_time("n/a", TimeHint::Seconds), None);
    }

    #[test]
    fn test_detect_generic() {
        assert!(detect("time;lat;lon\n0;43.9;12.6\n"));
        assert!(detect("1681207320,43.9612,12.6837,72\n"));
        assert!(!detect("name,score\nbob,3\n"));
    }

    #[test]
    fn test_parse_semicolon_log_with_mph() {
        let log = "Time (s);Latitude;Longitude;Speed (mph);Water Temp\n\
                   0.0;43.9612;12.6837;45;80\n\
                   0.1;43.96118;12.6837;45;80.5\n\
                   bad;43.96116;12.6837;45;81\n";
        let sequence = parse(log, &NormalizeConfig::default()).unwrap();
        assert_eq!(sequence.samples.len(), 2);
        assert!((sequence.samples[0].speed_mps - 20.1168).abs() < 1e-6);
        assert_eq!(sequence.samples[1].channel("water_temp"), Some(80.5));
        assert!((sequence.samples[1].time_ms - 100.).abs() < 1e-9);
    }

    #[test]
    fn test_speed_defaults_to_kph() {
        let log = "lat,lon,speed,t\n43.9612,12.6837,36,0\n43.96118,12.6837,36,1\n";
        let sequence = parse(log, &NormalizeConfig::default()).unwrap();
        assert!((sequence.samples[0].speed_mps - 10.).abs() < 1e-9);
        assert_eq!(sequence.samples[1].time_ms, 1000.);
    }

    #[test]
    fn test_parse_headerless_unix_rows() {
        let log = "1681207320.0,43.9612,12.6837,72,90\n1681207320.5,43.96118,12.6837,72,90\n";
        let sequence = parse(log, &NormalizeConfig::default()).unwrap();
        assert_eq!(sequence.samples.len(), 2);
        assert_eq!(sequence.samples[1].time_ms, 500.);
        assert_eq!(sequence.samples[1].heading_deg, Some(90.));
        assert!((sequence.samples[1].speed_mps - 20.).abs() < 1e-9);
    }

    #[test]
    fn test_clock_times_wrap_at_midnight() {
        let log = "time,lat,lon\n23:59:59.5,43.9612,12.6837\n00:00:00.5,43.96118,12.6837\n";
        let sequence = parse(log, &NormalizeConfig::default()).unwrap();
        assert_eq!(sequence.samples.len(), 2);
        assert!((sequence.samples[1].time_ms - 1000.).abs() < 1e-6);
    }
}
