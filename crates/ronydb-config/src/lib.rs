//! Settings file and passphrase configuration.
//!
//! `ronydb.toml` holds everything that is not secret. The passphrase lives
//! in an env file (`RONYDB_PASSPHRASE=...`) so it can be rotated in place.

mod passphrase;

pub use passphrase::{read_passphrase_var, PassphraseFile, NEW_PASSPHRASE_VAR, PASSPHRASE_VAR};

use chrono::{FixedOffset, NaiveTime};
use ronydb_crypto::KdfParams;
use ronydb_rotation::TableSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
    #[error("Failed to parse env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("{0} is not set in the environment or the env file")]
    MissingPassphrase(String),
    #[error("{0} is empty")]
    EmptyPassphrase(String),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub const DEFAULT_CONFIG_PATH: &str = "ronydb.toml";
pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_STORE_URL: &str = "sqlite://ronydb.db?mode=rwc";

/// Contents of `ronydb.toml`. Every key is optional.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub store_url: String,
    pub tables: TableNames,
    pub backup: BackupSettings,
    pub kdf: KdfSettings,
    pub rotation: RotationSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TableNames {
    pub primary: String,
    pub snapshots: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BackupSettings {
    pub retention_limit: u32,
    pub utc_offset_minutes: i32,
    pub zone_suffix: String,
    pub file_prefix: String,
    /// Daily run time, `HH:MM` in the configured offset.
    pub schedule_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct KdfSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RotationSettings {
    /// Empty means the encrypted `data` column of both the primary and the
    /// snapshot table.
    pub tables: Vec<TableSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            tables: TableNames::default(),
            backup: BackupSettings::default(),
            kdf: KdfSettings::default(),
            rotation: RotationSettings::default(),
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            primary: "cv_data".to_string(),
            snapshots: "cv_backups".to_string(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention_limit: 3,
            utc_offset_minutes: 6 * 60,
            zone_suffix: "BD".to_string(),
            file_prefix: "ronydb_backup".to_string(),
            schedule_at: "03:00".to_string(),
        }
    }
}

impl Default for KdfSettings {
    fn default() -> Self {
        let p = KdfParams::default();
        Self {
            memory_kib: p.memory_kib,
            iterations: p.iterations,
            parallelism: p.parallelism,
        }
    }
}

impl From<KdfSettings> for KdfParams {
    fn from(k: KdfSettings) -> Self {
        KdfParams {
            memory_kib: k.memory_kib,
            iterations: k.iterations,
            parallelism: k.parallelism,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings: Settings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backup.retention_limit == 0 {
            return Err(ConfigError::Invalid(
                "backup.retention_limit must be at least 1".into(),
            ));
        }
        self.offset()?;
        self.schedule_time()?;
        self.kdf_params()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("[kdf]: {}", e)))?;
        Ok(())
    }

    /// The fixed offset labels and the daily schedule are rendered in.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        self.backup
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "backup.utc_offset_minutes {} is out of range",
                    self.backup.utc_offset_minutes
                ))
            })
    }

    pub fn schedule_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hh_mm(&self.backup.schedule_at)
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.kdf.into()
    }

    pub fn rotation_tables(&self) -> Vec<TableSpec> {
        if !self.rotation.tables.is_empty() {
            return self.rotation.tables.clone();
        }
        vec![
            TableSpec::new(self.tables.primary.clone(), &["data"]),
            TableSpec::new(self.tables.snapshots.clone(), &["data"]),
        ]
    }
}

pub fn parse_hh_mm(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ConfigError::Invalid(format!("'{}' is not a HH:MM time", s)))
}
