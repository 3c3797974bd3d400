//! Rolling window of encrypted snapshots of the primary table.
//!
//! Slot 0 is always the newest snapshot. Each new snapshot pushes the
//! others back one slot and whatever falls off the end of the retention
//! window is deleted. There is no cross-row transaction underneath, so the
//! renumbering is written to converge: whatever state a failed or
//! overlapping run leaves behind, the next successful run compacts slots
//! back to `0..retention_limit`.

mod clock;
mod label;
mod manager;
mod schedule;

use ronydb_crypto::{DecryptFailure, EncryptError};
use ronydb_storage::StoreError;
use thiserror::Error;

pub use clock::{Clock, SystemClock};
pub use label::{LabelFormat, DEFAULT_OFFSET_SECS};
pub use manager::{
    RestoreReport, RowFailure, Snapshot, SnapshotDownload, SnapshotManager, SnapshotOptions,
};
pub use schedule::{run_daily, DailySchedule};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to read '{table}': {source}")]
    StoreRead {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to write '{table}': {source}")]
    StoreWrite {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("snapshot {id} could not be decrypted: {source}")]
    Decryption {
        id: String,
        #[source]
        source: DecryptFailure,
    },
    #[error("failed to encrypt snapshot: {0}")]
    Encrypt(#[from] EncryptError),
    #[error("invalid backup data: {0}")]
    InvalidInput(String),
    #[error("snapshot {0} not found")]
    NotFound(String),
}
