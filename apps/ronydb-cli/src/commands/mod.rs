pub mod backup;
pub mod restore;
pub mod rotate;
pub mod schedule;

pub use backup::{cmd_download_backup, cmd_list_backups, cmd_run_backup_cycle};
pub use restore::{cmd_restore_backup, cmd_restore_file};
pub use rotate::cmd_rotate_keys;
pub use schedule::cmd_schedule;

use std::path::Path;
use std::sync::Arc;

use ronydb_backup::{LabelFormat, SnapshotDownload, SnapshotManager, SnapshotOptions};
use ronydb_config::{ConfigError, PassphraseFile, Settings};
use ronydb_crypto::Codec;
use tracing::info;

use crate::backend::RowStoreBackend;

/// Settings and passphrase source shared by every command.
pub struct Context {
    pub settings: Settings,
    pub passphrases: PassphraseFile,
}

impl Context {
    pub fn load(
        config: &Path,
        store_url: Option<String>,
        env_file: &Path,
    ) -> Result<Self, ConfigError> {
        let mut settings = Settings::load_from(config)?;
        if let Some(url) = store_url {
            settings.store_url = url;
        }
        Ok(Self {
            settings,
            passphrases: PassphraseFile::new(env_file),
        })
    }

    pub async fn store(&self) -> Result<Arc<RowStoreBackend>, Box<dyn std::error::Error>> {
        let backend = RowStoreBackend::open(&self.settings.store_url).await?;
        info!(backend = backend.kind(), "store opened");
        Ok(Arc::new(backend))
    }

    pub fn codec(&self) -> Result<Codec, ConfigError> {
        Ok(Codec::new(
            self.passphrases.load()?,
            self.settings.kdf_params(),
        ))
    }

    pub fn snapshot_options(&self) -> Result<SnapshotOptions, ConfigError> {
        let backup = &self.settings.backup;
        Ok(SnapshotOptions {
            primary_table: self.settings.tables.primary.clone(),
            snapshot_table: self.settings.tables.snapshots.clone(),
            retention_limit: backup.retention_limit,
            labels: LabelFormat {
                offset: self.settings.offset()?,
                zone_suffix: backup.zone_suffix.clone(),
                file_prefix: backup.file_prefix.clone(),
            },
        })
    }

    pub async fn manager(&self) -> Result<SnapshotManager, Box<dyn std::error::Error>> {
        let codec = self.codec()?;
        let options = self.snapshot_options()?;
        Ok(SnapshotManager::new(self.store().await?, codec, options))
    }
}

/// Write a decrypted snapshot into `dir`, returning the file path.
pub fn write_download(
    download: &SnapshotDownload,
    dir: &Path,
) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(&download.filename);
    std::fs::write(&path, download.to_json_bytes()?)?;
    Ok(path)
}
