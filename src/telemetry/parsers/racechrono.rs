// RaceChrono CSV v3 export
//
// A short preamble naming the app and session, then a header row with
// Timestamp/Latitude/Longitude, followed by a units row and a source row before
// the data. Timestamps are unix seconds with a fractional part.

use crate::errors::RacelogError;
use crate::telemetry::{
    NormalizedSequence, SpeedUnit,
    normalize::{NormalizeConfig, RawFix, SequenceBuilder},
};

use super::{
    columns::{self, ColumnMap},
    plausible_unix_ms,
};

const SIGNATURE: &str = "racechrono";
const TIMESTAMP: &[&str] = &["timestamp"];
const ELAPSED: &[&str] = &["elapsed time", "elapsed"];

pub(super) fn detect(content: &str) -> bool {
    if content.to_ascii_lowercase().contains(SIGNATURE) {
        return true;
    }
    // Unbranded exports still carry a Timestamp column of unix seconds
    let rows = columns::read_rows(content, b',');
    let Some(header_index) = find_header(&rows) else {
        return false;
    };
    let header = ColumnMap::new(&rows[header_index]);
    let Some(timestamp) = header.find(TIMESTAMP) else {
        return false;
    };
    rows.iter()
        .skip(header_index + 1)
        .find_map(|row| columns::number_at(row, Some(timestamp)))
        .and_then(plausible_unix_ms)
        .is_some()
}

fn find_header(rows: &[Vec<String>]) -> Option<usize> {
    rows.iter().position(|row| {
        let map = ColumnMap::new(row);
        map.find(columns::LATITUDE_ALIASES).is_some()
            && map.find(columns::LONGITUDE_ALIASES).is_some()
    })
}

pub(super) fn parse(
    content: &str,
    config: &NormalizeConfig,
) -> Result<NormalizedSequence, RacelogError> {
    let rows = columns::read_rows(content, b',');
    let header_index = find_header(&rows).ok_or_else(|| RacelogError::MalformedLog {
        format: "RaceChrono".to_string(),
        reason: "no header row with latitude and longitude".to_string(),
    })?;
    let header = ColumnMap::new(&rows[header_index]);
    let timestamp = header.find(TIMESTAMP);
    let elapsed = header.find(ELAPSED);
    let lat = header.find(columns::LATITUDE_ALIASES);
    let lon = header.find(columns::LONGITUDE_ALIASES);
    let speed = header.find(columns::SPEED_ALIASES);
    let heading = header.find(columns::HEADING_ALIASES);
    if timestamp.is_none() && elapsed.is_none() {
        return Err(RacelogError::MalformedLog {
            format: "RaceChrono".to_string(),
            reason: "neither a timestamp nor an elapsed time column".to_string(),
        });
    }

    // The units row sits right under the header; fall back to the header label
    let speed_unit = rows
        .get(header_index + 1)
        .and_then(|units| columns::cell(units, speed))
        .and_then(columns::speed_unit_from_label)
        .or_else(|| {
            speed
                .and_then(|i| header.header(i))
                .and_then(columns::speed_unit_from_label)
        })
        .unwrap_or(SpeedUnit::Mps);
    let aux = header.aux_columns(&[timestamp, elapsed, lat, lon, speed, heading]);

    let mut builder = SequenceBuilder::new("RaceChrono", config);
    for row in rows.iter().skip(header_index + 1) {
        let time_ms = columns::number_at(row, timestamp)
            .and_then(plausible_unix_ms)
            .or_else(|| columns::number_at(row, elapsed).map(|s| s * 1000.));
        // units and source rows carry no numbers and fall out here
        let (Some(time_ms), Some(lat), Some(lon)) = (
            time_ms,
            columns::number_at(row, lat),
            columns::number_at(row, lon),
        ) else {
            continue;
        };
        builder.push(RawFix {
            time_ms,
            lat,
            lon,
            speed_mps: columns::number_at(row, speed).map(|v| speed_unit.to_mps(v)),
            heading_deg: columns::number_at(row, heading),
            channels: columns::collect_channels(row, &aux),
        });
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ACCURACY_CHANNEL;

    const RACECHRONO_LOG: &str = "This file is created using RaceChrono v7.0.11 ( http://www.racechrono.com/ ).
Format,3
Session title,\"Morning practice\"
Created,11/04/2023,10:02

Timestamp,Fragment ID,Lap #,Elapsed time,Distance traveled,Accuracy,Altitude,Bearing,Latitude,Longitude,Speed
unix time,,,s,m,m,m,deg,deg,deg,m/s
,,,,,100: gps,100: gps,100: gps,100: gps,100: gps,100: gps
1681207320.000,0,,0.000,0.0,1.2,101.5,271.3,43.9612,12.6837,30.55
1681207320.100,0,,0.100,3.1,1.2,101.5,271.3,43.9612,12.68366,30.60
1681207320.200,0,1,0.200,6.1,1.2,101.5,,43.9612,12.68362,
";

    #[test]
    fn test_detect_racechrono() {
        assert!(detect(RACECHRONO_LOG));
        let unbranded = "Timestamp,Latitude,Longitude\n1681207320.0,43.96,12.68\n";
        assert!(detect(unbranded));
        assert!(!detect("Time,Latitude,Longitude\n12.5,43.96,12.68\n"));
    }

    #[test]
    fn test_parse_racechrono() {
        let sequence = parse(RACECHRONO_LOG, &NormalizeConfig::default()).unwrap();
        assert_eq!(sequence.samples.len(), 3);
        let first = &sequence.samples[0];
        assert_eq!(first.time_ms, 0.);
        assert!((first.speed_mps - 30.55).abs() < 1e-9);
        assert_eq!(first.heading_deg, Some(271.3));
        assert_eq!(first.accuracy_m(), Some(1.2));
        assert_eq!(first.channel("distance_traveled"), Some(0.));
        assert!((sequence.samples[1].time_ms - 100.).abs() < 1e-3);
        assert!(sequence.channel_names.contains(ACCURACY_CHANNEL));
        assert_eq!(sequence.samples[2].channel("lap"), Some(1.));
    }
}
