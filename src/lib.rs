// Library interface for racelog

pub mod analysis;
pub mod config;
pub mod errors;
pub mod sync;
pub mod telemetry;
pub mod writer;

// Re-export commonly used types
pub use analysis::{BrakingZone, Course, Lap, SpeedEvent, Track};
pub use config::AnalysisConfig;
pub use errors::RacelogError;
pub use sync::{VideoClock, VideoSyncEngine, VideoSyncState};
pub use telemetry::{LogFormat, NormalizedSequence, ParsedLog, Sample, SpeedUnit};
