// Helpers shared by the delimited (CSV-like) formats

use std::collections::BTreeMap;

use log::debug;

use crate::telemetry::{
    ACCURACY_CHANNEL, ALTITUDE_CHANNEL, HDOP_CHANNEL, SATELLITES_CHANNEL, SpeedUnit,
};

pub(crate) const TIME_ALIASES: &[&str] = &[
    "time",
    "timestamp",
    "elapsed time",
    "elapsed",
    "utc time",
    "utc",
    "gps time",
    "datetime",
    "date time",
    "date/time",
    "seconds",
    "t",
];
pub(crate) const LATITUDE_ALIASES: &[&str] =
    &["latitude", "lat", "gps latitude", "gps_lat", "lat_deg", "gps lat"];
pub(crate) const LONGITUDE_ALIASES: &[&str] = &[
    "longitude",
    "lon",
    "lng",
    "long",
    "gps longitude",
    "gps_lon",
    "lon_deg",
    "gps lon",
];
pub(crate) const SPEED_ALIASES: &[&str] = &[
    "speed",
    "gps speed",
    "gps_speed",
    "ground speed",
    "velocity",
    "spd",
];
pub(crate) const HEADING_ALIASES: &[&str] = &[
    "heading",
    "bearing",
    "course",
    "cog",
    "gps heading",
    "gps_heading",
    "track",
];

/// Well-known channel headers mapped onto the canonical channel names
const CANONICAL_CHANNELS: &[(&str, &str)] = &[
    ("altitude", ALTITUDE_CHANNEL),
    ("altitude (m)", ALTITUDE_CHANNEL),
    ("gps altitude", ALTITUDE_CHANNEL),
    ("height", ALTITUDE_CHANNEL),
    ("accuracy", ACCURACY_CHANNEL),
    ("accuracy (m)", ACCURACY_CHANNEL),
    ("gps posaccuracy", ACCURACY_CHANNEL),
    ("satellites", SATELLITES_CHANNEL),
    ("sats", SATELLITES_CHANNEL),
    ("gps nsat", SATELLITES_CHANNEL),
    ("hdop", HDOP_CHANNEL),
];

/// Guesses the field delimiter from a header line, comma on ties
pub(crate) fn sniff_delimiter(line: &str) -> u8 {
    [b'\t', b';', b',']
        .into_iter()
        .max_by_key(|d| line.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

/// Splits delimited content into trimmed rows. Comment lines starting with `#`
/// are dropped and rows the reader cannot decode are skipped.
pub(crate) fn read_rows(content: &str, delimiter: u8) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => {
                if record.iter().any(|field| !field.is_empty()) {
                    rows.push(record.iter().map(str::to_string).collect());
                }
            }
            Err(e) => debug!("Skipping undecodable row: {}", e),
        }
    }
    rows
}

/// First line that is neither blank nor a comment
pub(crate) fn first_content_line(content: &str) -> Option<&str> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
}

pub(crate) fn parse_number(token: &str) -> Option<f64> {
    let value: f64 = token.trim().trim_matches('"').parse().ok()?;
    value.is_finite().then_some(value)
}

/// Picks a speed unit out of a header or units-row label
pub(crate) fn speed_unit_from_label(label: &str) -> Option<SpeedUnit> {
    let label = label.to_lowercase();
    if label.contains("km/h") || label.contains("kmh") || label.contains("kph") {
        Some(SpeedUnit::Kph)
    } else if label.contains("mph") {
        Some(SpeedUnit::Mph)
    } else if label.contains("m/s") || label.contains("mps") {
        Some(SpeedUnit::Mps)
    } else if label.contains("knot") || label.contains("kts") {
        Some(SpeedUnit::Knots)
    } else {
        None
    }
}

/// Channel name for an auxiliary column: canonical when well known, otherwise a
/// lowercase slug of the header
pub(crate) fn channel_name(header: &str) -> String {
    let lowered = header.trim().to_lowercase();
    if let Some((_, canonical)) = CANONICAL_CHANNELS.iter().find(|(h, _)| *h == lowered) {
        return canonical.to_string();
    }
    let mut slug = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// Header row of a delimited log with alias lookup
pub(crate) struct ColumnMap {
    headers: Vec<String>,
    /// Lowercased header with any `(unit)` suffix removed
    bases: Vec<String>,
}

impl ColumnMap {
    pub(crate) fn new(header_row: &[String]) -> Self {
        let headers: Vec<String> = header_row.iter().map(|h| h.trim().to_string()).collect();
        let bases = headers
            .iter()
            .map(|h| {
                let lowered = h.to_lowercase();
                match lowered.split_once('(') {
                    Some((base, _)) => base.trim().to_string(),
                    None => lowered,
                }
            })
            .collect();
        Self { headers, bases }
    }

    pub(crate) fn header(&self, index: usize) -> Option<&str> {
        self.headers.get(index).map(String::as_str)
    }

    /// Index of the first column whose base name matches one of the aliases,
    /// trying aliases in order of preference
    pub(crate) fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.bases.iter().position(|base| base == alias))
    }

    /// Every column not in `used`, paired with its channel name
    pub(crate) fn aux_columns(&self, used: &[Option<usize>]) -> Vec<(usize, String)> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(i, header)| !header.is_empty() && !used.contains(&Some(*i)))
            .map(|(i, header)| (i, channel_name(header)))
            .filter(|(_, name)| !name.is_empty())
            .collect()
    }
}

/// Reads the numeric auxiliary values of a row. Non-numeric cells are skipped and
/// the first column wins when two map to the same channel name.
pub(crate) fn collect_channels(row: &[String], aux: &[(usize, String)]) -> BTreeMap<String, f64> {
    let mut channels = BTreeMap::new();
    for (index, name) in aux {
        if let Some(value) = row.get(*index).and_then(|cell| parse_number(cell)) {
            channels.entry(name.clone()).or_insert(value);
        }
    }
    channels
}

pub(crate) fn cell<'r>(row: &'r [String], index: Option<usize>) -> Option<&'r str> {
    index.and_then(|i| row.get(i)).map(String::as_str)
}

pub(crate) fn number_at(row: &[String], index: Option<usize>) -> Option<f64> {
    cell(row, index).and_then(parse_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("time;lat;lon;speed"), b';');
        assert_eq!(sniff_delimiter("time\tlat\tlon"), b'\t');
        assert_eq!(sniff_delimiter("time,lat,lon"), b',');
    }

    #[test]
    fn test_column_lookup_strips_units() {
        let columns = ColumnMap::new(&header(&["Time (s)", "Latitude (deg)", "Speed (MPH)"]));
        assert_eq!(columns.find(TIME_ALIASES), Some(0));
        assert_eq!(columns.find(LATITUDE_ALIASES), Some(1));
        assert_eq!(columns.find(SPEED_ALIASES), Some(2));
        assert_eq!(columns.find(LONGITUDE_ALIASES), None);
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(channel_name("Altitude (m)"), ALTITUDE_CHANNEL);
        assert_eq!(channel_name("Altitude (ft)"), "altitude_ft");
        assert_eq!(channel_name("Engine RPM"), "engine_rpm");
        assert_eq!(channel_name("GPS Nsat"), SATELLITES_CHANNEL);
    }

    #[test]
    fn test_speed_unit_labels() {
        assert_eq!(speed_unit_from_label("Speed (MPH)"), Some(SpeedUnit::Mph));
        assert_eq!(speed_unit_from_label("km/h"), Some(SpeedUnit::Kph));
        assert_eq!(speed_unit_from_label("m/s"), Some(SpeedUnit::Mps));
        assert_eq!(speed_unit_from_label("speed"), None);
    }

    #[test]
    fn test_read_rows_skips_comments_and_blank_lines() {
        let rows = read_rows("# comment\na, b ,c\n\n1,2,3\n", b',');
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["a", "b", "c"]);
    }

    #[test]
    fn test_collect_channels_keeps_first_duplicate() {
        let columns = ColumnMap::new(&header(&["Time", "Altitude", "Height", "Notes"]));
        let aux = columns.aux_columns(&[Some(0)]);
        let row = header(&["1.0", "120.5", "99", "pit"]);
        let channels = collect_channels(&row, &aux);
        assert_eq!(channels.get(ALTITUDE_CHANNEL), Some(&120.5));
        assert!(!channels.contains_key("notes"));
    }
}
