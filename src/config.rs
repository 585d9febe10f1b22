use crate::app_dirs::AppDirs;
use crate::deviation::CompareDistance;
use crate::distance::GeneratorSpec;
use crate::source::AcquisitionMode;
use crate::units::LengthUnit;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the device's output is picked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShotsUpdateType {
    /// React to changes of the last-shot CSV, reading only its single row
    Latest,
    /// React to changes of the session log directory, reading every shot
    Rescan,
    /// Re-read the session log at a fixed interval
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub last_shot_csv_path: PathBuf,
    pub session_json_dir: PathBuf,
    pub shots_update_type: ShotsUpdateType,
    pub polling_interval_ms: u64,
    pub attach_retry_ms: u64,
    pub number_of_shots: usize,
    pub unit: LengthUnit,
    pub compare: CompareDistance,
    pub generator: GeneratorSpec,
    pub drill_name: String,
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let (last_shot_csv_path, session_json_dir) = if cfg!(windows) {
            (
                PathBuf::from("C:/Program Files (x86)/Foresight Sports Experience/System/LastShot.CSV"),
                PathBuf::from("C:/Program Files (x86)/Foresight Sports Experience/Sessions"),
            )
        } else {
            (PathBuf::from("data/LastShot.CSV"), PathBuf::from("data/sessions"))
        };
        Self {
            last_shot_csv_path,
            session_json_dir,
            shots_update_type: ShotsUpdateType::Latest,
            polling_interval_ms: 1000,
            attach_retry_ms: 2000,
            number_of_shots: 18,
            unit: LengthUnit::Meters,
            compare: CompareDistance::Carry,
            generator: GeneratorSpec::default(),
            drill_name: "combine".to_string(),
            database_path: None,
        }
    }
}

impl Config {
    pub fn acquisition_mode(&self) -> AcquisitionMode {
        match self.shots_update_type {
            ShotsUpdateType::Latest => AcquisitionMode::EventLatestOnly,
            ShotsUpdateType::Rescan => AcquisitionMode::EventFullRescan,
            ShotsUpdateType::Poll => AcquisitionMode::Polling {
                interval: Duration::from_millis(self.polling_interval_ms),
            },
        }
    }

    /// The file (latest mode) or directory (rescan/poll) the acquisition layer reads
    pub fn source_path(&self) -> &Path {
        match self.shots_update_type {
            ShotsUpdateType::Latest => &self.last_shot_csv_path,
            ShotsUpdateType::Rescan | ShotsUpdateType::Poll => &self.session_json_dir,
        }
    }

    pub fn attach_retry(&self) -> Duration {
        Duration::from_millis(self.attach_retry_ms)
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("approachshot_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable config"),
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}
