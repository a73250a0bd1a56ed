// End to end: a logger export on disk through parsing, lap timing, pace and export

use std::fmt::Write as _;

use racelog::{
    AnalysisConfig, LogFormat, Sample,
    analysis::{
        Course, TimingLine, Track, compare_pace, compute_g_forces, detect_braking_zones,
        detect_laps, fastest_lap, lap_samples,
    },
    telemetry::{GeoPoint, parse_log, parsers::parse_file},
    writer::{read_jsonl, write_jsonl},
};
use tempfile::TempDir;

const LAT0: f64 = 45.;
const LON0: f64 = 9.;
const SIDE: f64 = 0.002;
const SAMPLES_PER_LAP: usize = 400;
const STEP: f64 = 4. * SIDE / SAMPLES_PER_LAP as f64;

/// Generic CSV export of 2.5 laps around a square at 10 Hz
fn square_csv() -> String {
    let mut csv = String::from("Time (s),Latitude,Longitude,Speed (km/h),Satellites\n");
    for i in 0..=(SAMPLES_PER_LAP * 5 / 2) {
        let p = (i % SAMPLES_PER_LAP) as f64 * STEP;
        let (lat, lon) = match (p / SIDE) as usize {
            0 => (LAT0, LON0 + p),
            1 => (LAT0 + p - SIDE, LON0 + SIDE),
            2 => (LAT0 + SIDE, LON0 + SIDE - (p - 2. * SIDE)),
            _ => (LAT0 + SIDE - (p - 3. * SIDE), LON0),
        };
        let speed_kph = 72. + (i % 7) as f64 * 3.6;
        writeln!(csv, "{:.1},{:.7},{:.7},{:.2},9", i as f64 * 0.1, lat, lon, speed_kph).unwrap();
    }
    csv
}

fn square_track() -> Track {
    let lon = LON0 + SIDE / 2. + STEP / 2.;
    Track {
        name: "Square".to_string(),
        courses: vec![Course::new(
            "Full",
            TimingLine::new(GeoPoint::new(LAT0 - 0.0005, lon), GeoPoint::new(LAT0 + 0.0005, lon)),
        )],
    }
}

#[test]
fn test_generic_csv_to_laps() {
    let config = AnalysisConfig::default();
    let parsed = parse_log(square_csv().as_bytes(), &config.normalize).unwrap();
    assert_eq!(parsed.format, LogFormat::GenericCsv);
    assert_eq!(parsed.sequence.len(), 1001);
    assert!((parsed.sequence.sample_rate_hz() - 10.).abs() < 1e-6);
    assert!(parsed.sequence.channel_names.contains("satellites"));
    assert!((parsed.sequence.samples[0].speed_mps - 20.).abs() < 1e-6);

    let track = square_track();
    let laps = detect_laps(&parsed.sequence.samples, track.course(None).unwrap(), &config.laps);
    assert_eq!(laps.len(), 2);
    for lap in &laps {
        assert!((lap.lap_time_ms - 40_000.).abs() < 1., "{}", lap.lap_time_ms);
        assert_eq!(lap_samples(&parsed.sequence.samples, lap).len(), SAMPLES_PER_LAP);
    }
    assert!(fastest_lap(&laps).is_some());
}

#[test]
fn test_track_file_and_pace_between_laps() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("session.csv");
    let track_path = dir.path().join("square.json");
    std::fs::write(&log_path, square_csv()).unwrap();
    std::fs::write(&track_path, serde_json::to_string(&square_track()).unwrap()).unwrap();

    let config = AnalysisConfig::default();
    let parsed = parse_file(&log_path, &config.normalize).unwrap();
    let track = Track::from_file(&track_path).unwrap();
    let laps = detect_laps(
        &parsed.sequence.samples,
        track.course(Some("full")).unwrap(),
        &config.laps,
    );
    assert_eq!(laps.len(), 2);

    // both laps follow the same line at the same pace
    let samples = &parsed.sequence.samples;
    let comparison = compare_pace(lap_samples(samples, &laps[1]), lap_samples(samples, &laps[0]));
    let final_delta = comparison.final_delta_ms().unwrap();
    assert!(final_delta.abs() < 50., "{}", final_delta);
}

#[test]
fn test_constant_pace_has_no_braking_and_exports() {
    let config = AnalysisConfig::default();
    let parsed = parse_log(square_csv().as_bytes(), &config.normalize).unwrap();
    let samples = &parsed.sequence.samples;

    // the 7-sample speed ripple never holds a deceleration long enough
    assert!(detect_braking_zones(samples, &config.braking).is_empty());

    let derived = compute_g_forces(samples, &config.gforce);
    assert_eq!(derived.lateral_g.len(), samples.len());
    assert_eq!(derived.longitudinal_g.len(), samples.len());

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.jsonl");
    assert_eq!(write_jsonl(&path, samples).unwrap(), samples.len());
    let restored: Vec<Sample> = read_jsonl(&path).unwrap();
    assert_eq!(restored.len(), samples.len());
    for (restored, original) in restored.iter().zip(samples) {
        assert!((restored.lat - original.lat).abs() < 1e-9);
        assert!((restored.speed_mps - original.speed_mps).abs() < 1e-9);
        assert_eq!(
            restored.channels.keys().collect::<Vec<_>>(),
            original.channels.keys().collect::<Vec<_>>()
        );
    }
}
