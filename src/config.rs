use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{BrakingConfig, GForceConfig, LapConfig, SpeedEventConfig},
    errors::RacelogError,
    sync::SyncConfig,
    telemetry::{NormalizeConfig, SpeedUnit},
};

const CONFIG_DIR_NAME: &str = "racelog";
const CONFIG_FILE_NAME: &str = "config.json";

/// Every tunable of the analysis pipeline. Missing fields in a config file
/// fall back to their defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub normalize: NormalizeConfig,
    pub gforce: GForceConfig,
    pub laps: LapConfig,
    pub speed_events: SpeedEventConfig,
    pub braking: BrakingConfig,
    pub sync: SyncConfig,
    pub speed_unit: SpeedUnit,
}

impl AnalysisConfig {
    pub fn default_path() -> Result<PathBuf, RacelogError> {
        Ok(dirs::config_dir()
            .ok_or(RacelogError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Loads the user's config, or the defaults when there is none
    pub fn from_local_file() -> Result<Self, RacelogError> {
        match dirs::config_dir() {
            Some(dir) => Self::from_path(&dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)),
            None => {
                debug!("No config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, RacelogError> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let file = File::open(path).map_err(|e| RacelogError::ConfigIOError { source: e })?;
        let config = serde_json::from_reader(file)
            .map_err(|e| RacelogError::ConfigSerializeError { source: e })?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<(), RacelogError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), RacelogError> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| RacelogError::ConfigIOError { source: e })?;
        }
        let file = File::create(path).map_err(|e| RacelogError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| RacelogError::ConfigSerializeError { source: e })
    }
}
