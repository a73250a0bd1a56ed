use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
    process,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use racelog::{
    AnalysisConfig, RacelogError, Sample, SpeedUnit,
    analysis::{
        Lap, Track, compare_pace, compute_g_forces, detect_braking_zones, detect_laps,
        detect_speed_events, fastest_lap, lap_samples,
    },
    sync::{FileBasedSyncStore, FrameLoop, PlaybackClock, SyncStore, VideoSyncEngine},
    telemetry::{ParsedLog, parsers::parse_file},
    writer::write_jsonl,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Print debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the one in the user config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Unit for printed speeds, overrides the config
    #[arg(short, long, global = true, value_enum)]
    unit: Option<SpeedUnit>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detected format, sample count, duration and channels of a log
    Inspect { input: PathBuf },
    /// Lap and sector times against a track definition
    Laps {
        input: PathBuf,
        #[arg(short, long)]
        track: PathBuf,
        #[arg(long)]
        course: Option<String>,
    },
    /// Braking zones
    Braking { input: PathBuf },
    /// Speed peaks and valleys
    Events { input: PathBuf },
    /// Running time delta of a lap against a reference lap
    Pace {
        input: PathBuf,
        #[arg(short, long)]
        track: PathBuf,
        #[arg(long)]
        course: Option<String>,
        /// Log holding the reference lap, defaults to the input
        #[arg(short, long)]
        reference: Option<PathBuf>,
        /// Lap to compare, defaults to the last complete lap
        #[arg(short, long)]
        lap: Option<usize>,
    },
    /// Normalized samples with derived g channels as JSON lines
    Export {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Replays a simulated video clock locked to the telemetry
    Sync {
        input: PathBuf,
        /// telemetry time = video time + offset
        #[arg(long, allow_hyphen_values = true)]
        offset_ms: Option<f64>,
        #[arg(long)]
        duration_s: f64,
        #[arg(long, default_value_t = 30.)]
        fps: f64,
        /// Video position to start the replay from
        #[arg(long, default_value_t = 0.)]
        start_s: f64,
        /// Remember the offset under this session id
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Serialize)]
struct ExportRow<'a> {
    #[serde(flatten)]
    sample: &'a Sample,
    lateral_g: Option<f64>,
    longitudinal_g: Option<f64>,
}

fn format_time(ms: f64) -> String {
    let total_s = ms / 1000.;
    let minutes = (total_s / 60.).floor();
    format!("{}:{:06.3}", minutes, total_s - minutes * 60.)
}

fn inspect(parsed: &ParsedLog) {
    let sequence = &parsed.sequence;
    println!("Format:    {}", parsed.format);
    println!("Samples:   {}", sequence.len());
    println!("Duration:  {}", format_time(sequence.duration_ms()));
    println!("Rate:      {:.1} Hz", sequence.sample_rate_hz());
    if sequence.channel_names.is_empty() {
        println!("Channels:  none");
    } else {
        let names: Vec<&str> = sequence.channel_names.iter().map(String::as_str).collect();
        println!("Channels:  {}", names.join(", "));
    }
}

fn load_laps(
    parsed: &ParsedLog,
    track: &Path,
    course: Option<&str>,
    config: &AnalysisConfig,
) -> Result<Vec<Lap>, RacelogError> {
    let track = Track::from_file(track)?;
    let course = track.course(course)?;
    Ok(detect_laps(&parsed.sequence.samples, course, &config.laps))
}

fn print_laps(laps: &[Lap], unit: SpeedUnit) {
    if laps.is_empty() {
        println!("No complete laps");
        return;
    }
    let fastest = fastest_lap(laps).map(|lap| lap.number);
    println!(
        "{:>4}  {:>10}  {:>10}  {:>10}  {:>10}  {:>8}  {:>8}",
        "Lap",
        "Time",
        "S1",
        "S2",
        "S3",
        format!("Max {}", unit.label()),
        format!("Min {}", unit.label())
    );
    for lap in laps {
        let sectors = match lap.sector_times_ms() {
            Some(times) => times.map(format_time),
            None => ["-".to_string(), "-".to_string(), "-".to_string()],
        };
        println!(
            "{:>4}  {:>10}  {:>10}  {:>10}  {:>10}  {:>8.1}  {:>8.1}{}",
            lap.number,
            format_time(lap.lap_time_ms),
            sectors[0],
            sectors[1],
            sectors[2],
            unit.from_mps(lap.max_speed_mps),
            unit.from_mps(lap.min_speed_mps),
            if Some(lap.number) == fastest { "  *" } else { "" }
        );
    }
}

fn braking(parsed: &ParsedLog, config: &AnalysisConfig, unit: SpeedUnit) {
    let zones = detect_braking_zones(&parsed.sequence.samples, &config.braking);
    println!("{} braking zones", zones.len());
    for zone in zones {
        println!(
            "{:>10}  {:>6.0}ms  {:>6.1} -> {:>6.1} {}  peak {:.2}g  {:.0}m",
            format_time(zone.start.time_ms),
            zone.duration_ms(),
            unit.from_mps(zone.start.speed_mps),
            unit.from_mps(zone.end.speed_mps),
            unit.label(),
            zone.peak_decel_g,
            zone.distance_m
        );
    }
}

fn events(parsed: &ParsedLog, config: &AnalysisConfig, unit: SpeedUnit) {
    let events = detect_speed_events(&parsed.sequence.samples, &config.speed_events);
    println!("{} speed events", events.len());
    for event in events {
        println!(
            "{:>10}  {:?}  {:.1} {}  ({:.6}, {:.6})",
            format_time(event.time_ms),
            event.kind,
            unit.from_mps(event.speed_mps),
            unit.label(),
            event.position.lat,
            event.position.lon
        );
    }
}

fn pace(
    parsed: &ParsedLog,
    track: &Path,
    course: Option<&str>,
    reference: Option<&Path>,
    lap_number: Option<usize>,
    config: &AnalysisConfig,
) -> Result<(), RacelogError> {
    let laps = load_laps(parsed, track, course, config)?;
    let current = match lap_number {
        Some(number) => laps.iter().find(|lap| lap.number == number),
        None => laps.last(),
    }
    .ok_or_else(|| RacelogError::InvalidUserInput {
        field: "lap".to_string(),
        reason: "no such complete lap in the log".to_string(),
    })?;

    let reference_log = match reference {
        Some(path) => Some(parse_file(path, &config.normalize)?),
        None => None,
    };
    let (reference_log, reference_laps) = match &reference_log {
        Some(log) => (log, load_laps(log, track, course, config)?),
        None => (parsed, laps.clone()),
    };
    let reference_lap = fastest_lap(&reference_laps).ok_or_else(|| RacelogError::InvalidUserInput {
        field: "reference".to_string(),
        reason: "reference log has no complete laps".to_string(),
    })?;

    let current_samples = lap_samples(&parsed.sequence.samples, current);
    let comparison = compare_pace(
        current_samples,
        lap_samples(&reference_log.sequence.samples, reference_lap),
    );
    println!(
        "Lap {} ({}) against reference lap {} ({})",
        current.number,
        format_time(current.lap_time_ms),
        reference_lap.number,
        format_time(reference_lap.lap_time_ms)
    );
    let step = (current_samples.len() / 10).max(1);
    for (i, delta) in comparison.delta_ms.iter().enumerate().step_by(step) {
        if let Some(delta) = delta {
            println!(
                "{:>10}  {:+.3}s",
                format_time(current_samples[i].time_ms - current_samples[0].time_ms),
                delta / 1000.
            );
        }
    }
    match comparison.final_delta_ms() {
        Some(delta) => println!("Final delta {:+.3}s", delta / 1000.),
        None => println!("Laps have nothing in common to compare"),
    }
    Ok(())
}

fn export(parsed: &ParsedLog, output: &Path, config: &AnalysisConfig) -> Result<(), RacelogError> {
    let samples = &parsed.sequence.samples;
    let derived = compute_g_forces(samples, &config.gforce);
    let rows = samples.iter().enumerate().map(|(i, sample)| ExportRow {
        sample,
        lateral_g: derived.lateral_g.get(i).copied(),
        longitudinal_g: derived.longitudinal_g.get(i).copied(),
    });
    let written = write_jsonl(output, rows)?;
    println!("Exported {} samples to {}", written, output.display());
    Ok(())
}

struct SyncReplay<'a> {
    offset_ms: Option<f64>,
    duration_s: f64,
    fps: f64,
    start_s: f64,
    session: Option<&'a str>,
}

fn sync(
    input: &Path,
    parsed: &ParsedLog,
    replay: SyncReplay,
    config: &AnalysisConfig,
    unit: SpeedUnit,
) -> Result<(), RacelogError> {
    let mut store = match replay.session {
        Some(_) => Some(FileBasedSyncStore::new_default()?),
        None => None,
    };
    let mut engine = VideoSyncEngine::new(parsed.sequence.timestamps(), &config.sync)?;
    let video_name = input
        .file_stem()
        .map(|s| format!("{}.mp4", s.to_string_lossy()))
        .unwrap_or_else(|| "replay.mp4".to_string());
    engine.load_video(PlaybackClock::new(&video_name, replay.duration_s, replay.fps));

    match (replay.offset_ms, replay.session, store.as_ref()) {
        (Some(offset_ms), _, _) => engine.set_offset_ms(offset_ms),
        (None, Some(session), Some(store)) => match store.load_record(session)? {
            Some(record) => engine.restore(&record, |record| {
                Some(PlaybackClock::new(
                    record.video_name.as_deref().unwrap_or(video_name.as_str()),
                    replay.duration_s,
                    replay.fps,
                ))
            }),
            None => warn!("No saved sync for session {}, using a zero offset", session),
        },
        _ => {}
    }

    engine.set_locked(true);
    engine.seek_video(replay.start_s)?;
    engine.play()?;
    info!("Replaying with offset {:.0}ms", engine.offset_ms());

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    let speeds: Vec<f64> = parsed.sequence.samples.iter().map(|s| s.speed_mps).collect();
    let engine = Arc::new(Mutex::new(engine));
    let mut last_index = None;
    let frame_loop = FrameLoop::spawn(
        engine.clone(),
        Duration::from_millis(config.sync.frame_interval_ms),
        move |state| {
            if interrupted.load(Ordering::Relaxed) || !state.playing {
                return ControlFlow::Break(());
            }
            if last_index != Some(state.telemetry_index) {
                last_index = Some(state.telemetry_index);
                println!(
                    "video {:>10}  telemetry {:>10}  #{:<6} {:.1} {}",
                    format_time(state.video_time_ms.unwrap_or(0.)),
                    format_time(state.telemetry_time_ms),
                    state.telemetry_index,
                    unit.from_mps(speeds.get(state.telemetry_index).copied().unwrap_or(0.)),
                    unit.label()
                );
            }
            ControlFlow::Continue(())
        },
    )?;
    frame_loop.join()?;

    let mut engine = engine.lock().map_err(|_| RacelogError::FrameLoopPoisoned)?;
    if let (Some(session), Some(store)) = (replay.session, store.as_mut()) {
        store.save_record(&engine.to_record(session))?;
    }
    engine.teardown();
    Ok(())
}

fn run(cli: Args) -> Result<(), RacelogError> {
    let config = match &cli.config {
        Some(path) => AnalysisConfig::from_path(path)?,
        None => AnalysisConfig::from_local_file()?,
    };
    let unit = cli.unit.unwrap_or(config.speed_unit);

    match &cli.command {
        Commands::Inspect { input } => inspect(&parse_file(input, &config.normalize)?),
        Commands::Laps {
            input,
            track,
            course,
        } => {
            let parsed = parse_file(input, &config.normalize)?;
            let laps = load_laps(&parsed, track, course.as_deref(), &config)?;
            print_laps(&laps, unit);
        }
        Commands::Braking { input } => {
            braking(&parse_file(input, &config.normalize)?, &config, unit)
        }
        Commands::Events { input } => {
            events(&parse_file(input, &config.normalize)?, &config, unit)
        }
        Commands::Pace {
            input,
            track,
            course,
            reference,
            lap,
        } => pace(
            &parse_file(input, &config.normalize)?,
            track,
            course.as_deref(),
            reference.as_deref(),
            *lap,
            &config,
        )?,
        Commands::Export { input, output } => {
            export(&parse_file(input, &config.normalize)?, output, &config)?
        }
        Commands::Sync {
            input,
            offset_ms,
            duration_s,
            fps,
            start_s,
            session,
        } => sync(
            input,
            &parse_file(input, &config.normalize)?,
            SyncReplay {
                offset_ms: *offset_ms,
                duration_s: *duration_s,
                fps: *fps,
                start_s: *start_s,
                session: session.as_deref(),
            },
            &config,
            unit,
        )?,
    }
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if cfg!(debug_assertions) || cli.verbose {
        let mut logger = colog::default_builder();
        if cli.verbose {
            logger.filter(None, log::LevelFilter::Debug);
        }
        logger.init();
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", snafu::Report::from_error(e));
        process::exit(1);
    }
}
