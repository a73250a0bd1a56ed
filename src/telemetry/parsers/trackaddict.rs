// RaceRender CSV as written by TrackAddict
//
// `#` comment preamble, a header row and one row per logger tick. GPS runs
// slower than the logger, so only rows flagged with GPS_Update = 1 carry a new
// fix; the rest repeat the previous position.

use crate::errors::RacelogError;
use crate::telemetry::{
    NormalizedSequence, SpeedUnit,
    normalize::{NormalizeConfig, RawFix, SequenceBuilder},
};

use super::columns::{self, ColumnMap};

const SIGNATURE: &str = "racerender";
const GPS_UPDATE: &[&str] = &["gps_update"];

pub(super) fn detect(content: &str) -> bool {
    let lowered = content.to_ascii_lowercase();
    lowered.contains(SIGNATURE)
        || columns::first_content_line(&lowered)
            .is_some_and(|header| header.split(',').any(|h| h.trim() == "gps_update"))
}

pub(super) fn parse(
    content: &str,
    config: &NormalizeConfig,
) -> Result<NormalizedSequence, RacelogError> {
    let rows = columns::read_rows(content, b',');
    let Some((header_row, data)) = rows.split_first() else {
        return Err(RacelogError::NoValidSamples {
            format: "TrackAddict".to_string(),
        });
    };
    let header = ColumnMap::new(header_row);
    let time = header.find(&["time"]);
    let lat = header.find(columns::LATITUDE_ALIASES);
    let lon = header.find(columns::LONGITUDE_ALIASES);
    if time.is_none() || lat.is_none() || lon.is_none() {
        return Err(RacelogError::MalformedLog {
            format: "TrackAddict".to_string(),
            reason: "header is missing Time, Latitude or Longitude".to_string(),
        });
    }
    let speed = header.find(columns::SPEED_ALIASES);
    let heading = header.find(columns::HEADING_ALIASES);
    let gps_update = header.find(GPS_UPDATE);
    let speed_unit = speed
        .and_then(|i| header.header(i))
        .and_then(columns::speed_unit_from_label)
        .unwrap_or(SpeedUnit::Mph);
    let aux = header.aux_columns(&[time, lat, lon, speed, heading, gps_update]);

    let mut builder = SequenceBuilder::new("TrackAddict", config);
    for row in data {
        if gps_update.is_some() && columns::number_at(row, gps_update) != Some(1.) {
            continue;
        }
        let (Some(time_s), Some(lat), Some(lon)) = (
            columns::number_at(row, time),
            columns::number_at(row, lat),
            columns::number_at(row, lon),
        ) else {
            continue;
        };
        builder.push(RawFix {
            time_ms: time_s * 1000.,
            lat,
            lon,
            speed_mps: columns::number_at(row, speed).map(|v| speed_unit.to_mps(v)),
            heading_deg: columns::number_at(row, heading),
            channels: columns::collect_channels(row, &aux),
        });
    }
    builder.finish()
}
