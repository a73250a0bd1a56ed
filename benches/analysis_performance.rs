use criterion::{Criterion, black_box, criterion_group, criterion_main};
use racelog::analysis::{
    BrakingConfig, Course, GForceConfig, LapConfig, SpeedEventConfig, TimingLine,
    compute_g_forces, detect_braking_zones, detect_laps, detect_speed_events,
};
use racelog::sync::nearest_sample_index;
use racelog::telemetry::{GeoPoint, NormalizeConfig, Sample, parse_log};
use std::fmt::Write as _;
use std::time::Duration;

const LAT0: f64 = 43.96;
const LON0: f64 = 12.68;
const RADIUS_DEG: f64 = 0.003;
/// 25 Hz, 60 s per lap
const SAMPLES_PER_LAP: usize = 1500;

/// Laps of a circle with a braking dip each lap
fn create_session(laps: usize) -> Vec<Sample> {
    (0..laps * SAMPLES_PER_LAP)
        .map(|i| {
            let phase = (i % SAMPLES_PER_LAP) as f64 / SAMPLES_PER_LAP as f64;
            let angle = phase * std::f64::consts::TAU;
            let dip = if (0.4..0.5).contains(&phase) {
                (phase - 0.4) * 150.
            } else {
                0.
            };
            Sample {
                time_ms: i as f64 * 40.,
                lat: LAT0 + RADIUS_DEG * angle.sin(),
                lon: LON0 + RADIUS_DEG * angle.cos(),
                speed_mps: 40. - dip,
                heading_deg: Some((360. - angle.to_degrees()) % 360.),
                ..Default::default()
            }
        })
        .collect()
}

fn create_csv(samples: &[Sample]) -> String {
    let mut csv = String::from("time,lat,lon,speed (m/s),heading\n");
    for sample in samples {
        let _ = writeln!(
            csv,
            "{:.3},{:.7},{:.7},{:.3},{:.1}",
            sample.time_ms / 1000.,
            sample.lat,
            sample.lon,
            sample.speed_mps,
            sample.heading_deg.unwrap_or(0.)
        );
    }
    csv
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    let csv = create_csv(&create_session(10));
    let config = NormalizeConfig::default();

    group.bench_function("parse_generic_csv_10_laps", |b| {
        b.iter(|| black_box(parse_log(black_box(csv.as_bytes()), &config).unwrap()));
    });

    group.finish();
}

fn bench_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis");
    let samples = create_session(10);
    let course = Course::new(
        "circle",
        TimingLine::new(
            GeoPoint::new(LAT0 - 0.0005, LON0 + RADIUS_DEG),
            GeoPoint::new(LAT0 + 0.0005, LON0 + RADIUS_DEG),
        ),
    );

    group.bench_function("g_forces", |b| {
        let config = GForceConfig::default();
        b.iter(|| black_box(compute_g_forces(black_box(&samples), &config)));
    });

    group.bench_function("laps", |b| {
        let config = LapConfig::default();
        b.iter(|| black_box(detect_laps(black_box(&samples), &course, &config)));
    });

    group.bench_function("braking_zones", |b| {
        let config = BrakingConfig::default();
        b.iter(|| black_box(detect_braking_zones(black_box(&samples), &config)));
    });

    group.bench_function("speed_events", |b| {
        let config = SpeedEventConfig::default();
        b.iter(|| black_box(detect_speed_events(black_box(&samples), &config)));
    });

    group.finish();
}

fn bench_sync_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    let timestamps: Vec<f64> = create_session(10).iter().map(|s| s.time_ms).collect();

    group.bench_function("nearest_sample_index", |b| {
        let mut target = 0.;
        b.iter(|| {
            target = (target + 16.6) % 600_000.;
            black_box(nearest_sample_index(&timestamps, target))
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets = bench_parsing, bench_analysis, bench_sync_lookup
}
criterion_main!(benches);
