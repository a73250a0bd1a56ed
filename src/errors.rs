// Error types for racelog

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum RacelogError {
    // Errors while reading and parsing log files
    #[snafu(display("Unable to read log file {path}"))]
    LogReadError { path: String, source: io::Error },
    #[snafu(display("No supported logger format recognized"))]
    UnrecognizedFormat,
    #[snafu(display("No valid samples recovered from {format} log"))]
    NoValidSamples { format: String },
    #[snafu(display("Malformed {format} log: {reason}"))]
    MalformedLog { format: String, reason: String },

    // Course and track definitions
    #[snafu(display("Unable to load track definition"))]
    CourseLoadError { source: io::Error },
    #[snafu(display("Invalid track definition"))]
    CourseParseError { source: serde_json::Error },
    #[snafu(display("Course {name} not found in track {track}"))]
    CourseNotFound { track: String, name: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Video sync errors
    #[snafu(display("No video loaded"))]
    NoVideoLoaded,
    #[snafu(display("Frame stepping is only available while sync is unlocked"))]
    FrameStepWhileLocked,
    #[snafu(display("Sync engine lock poisoned by a panicked frame loop"))]
    FrameLoopPoisoned,
    #[snafu(display("Sync store error: {reason}"))]
    SyncStoreError { reason: String },

    // Errors for the export writer
    #[snafu(display("Error writing export file"))]
    WriterError { source: io::Error },

    // User input validation errors
    #[snafu(display("Invalid user input: {field} - {reason}"))]
    InvalidUserInput { field: String, reason: String },
}
