// AiM Race Studio CSV export
//
// A quoted key/value preamble starting with "Format","AiM CSV File", then a header
// row starting with "Time", a units row, and elapsed-seconds data rows.

use crate::errors::RacelogError;
use crate::telemetry::{
    ACCURACY_CHANNEL, NormalizedSequence, SpeedUnit,
    normalize::{NormalizeConfig, RawFix, SequenceBuilder},
};

use super::columns::{self, ColumnMap};

const SIGNATURE: &str = "aim csv file";

const LATITUDE: &[&str] = &["gps latitude", "latitude"];
const LONGITUDE: &[&str] = &["gps longitude", "longitude"];
const SPEED: &[&str] = &["gps speed", "speed"];
const HEADING: &[&str] = &["gps heading", "heading"];

pub(super) fn detect(content: &str) -> bool {
    content
        .lines()
        .take(5)
        .any(|line| line.to_ascii_lowercase().contains(SIGNATURE))
}

pub(super) fn parse(
    content: &str,
    config: &NormalizeConfig,
) -> Result<NormalizedSequence, RacelogError> {
    let rows = columns::read_rows(content, b',');
    let header_index = rows
        .iter()
        .position(|row| {
            row.first().is_some_and(|c| c.eq_ignore_ascii_case("time"))
                && ColumnMap::new(row).find(LATITUDE).is_some()
        })
        .ok_or_else(|| RacelogError::MalformedLog {
            format: "AiM CSV".to_string(),
            reason: "no header row with Time and GPS Latitude".to_string(),
        })?;
    let header = ColumnMap::new(&rows[header_index]);
    let units = rows.get(header_index + 1);
    let unit_of = |index: Option<usize>| units.and_then(|row| columns::cell(row, index));

    let time = Some(0);
    let lat = header.find(LATITUDE);
    let lon = header.find(LONGITUDE);
    let speed = header.find(SPEED);
    let heading = header.find(HEADING);
    let speed_unit = unit_of(speed)
        .and_then(columns::speed_unit_from_label)
        .unwrap_or(SpeedUnit::Kph);
    let accuracy_in_mm = header
        .find(&["gps posaccuracy"])
        .and_then(|i| unit_of(Some(i)))
        .is_some_and(|unit| unit.eq_ignore_ascii_case("mm"));
    let aux = header.aux_columns(&[time, lat, lon, speed, heading]);

    let mut builder = SequenceBuilder::new("AiM CSV", config);
    for row in rows.iter().skip(header_index + 1) {
        // units and channel id rows fail here along with any other malformed row
        let (Some(time_s), Some(lat), Some(lon)) = (
            columns::number_at(row, time),
            columns::number_at(row, lat),
            columns::number_at(row, lon),
        ) else {
            continue;
        };
        let mut channels = columns::collect_channels(row, &aux);
        if accuracy_in_mm && let Some(accuracy) = channels.get_mut(ACCURACY_CHANNEL) {
            *accuracy /= 1000.;
        }
        builder.push(RawFix {
            time_ms: time_s * 1000.,
            lat,
            lon,
            speed_mps: columns::number_at(row, speed).map(|v| speed_unit.to_mps(v)),
            heading_deg: columns::number_at(row, heading),
            channels,
        });
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AIM_LOG: &str = r##""Format","AiM CSV File"
"Venue","Misano"
"Vehicle","Kart"
"Sample Rate","10"

"Time","GPS Speed","GPS Nsat","GPS Heading","GPS PosAccuracy","GPS Latitude","GPS Longitude","RPM"
"s","km/h","#","deg","mm","deg","deg","rpm"
"0.000","72.0","11","180.0","1500","43.9612","12.6837","9000"
"0.100","72.0","11","180.0","1500","43.96118","12.6837","9100"
"0.200","","11","180.0","1500","","12.6837","9200"
"##;

    #[test]
    fn test_detect_aim() {
        assert!(detect(AIM_LOG));
        assert!(!detect("Time,Latitude,Longitude\n"));
    }

    #[test]
    fn test_parse_aim() {
        let sequence = parse(AIM_LOG, &NormalizeConfig::default()).unwrap();
        assert_eq!(sequence.samples.len(), 2);
        let first = &sequence.samples[0];
        assert!((first.speed_mps - 20.).abs() < 1e-9);
        assert_eq!(first.heading_deg, Some(180.));
        assert_eq!(first.accuracy_m(), Some(1.5));
        assert_eq!(first.channel("rpm"), Some(9000.));
        assert!((sequence.samples[1].time_ms - 100.).abs() < 1e-9);
    }
}
