use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use ronydb_crypto::Codec;
use ronydb_storage::{
    key_text, row_key, Filter, Order, Query, Row, RowStore, StoreError, ID_COLUMN,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{BackupError, Clock, LabelFormat, SystemClock};

const SLOT: &str = "slot";
const CREATED_AT: &str = "created_at";
const DATA: &str = "data";

#[derive(Clone, Debug)]
pub struct SnapshotOptions {
    pub primary_table: String,
    pub snapshot_table: String,
    pub retention_limit: u32,
    pub labels: LabelFormat,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            primary_table: "cv_data".to_string(),
            snapshot_table: "cv_backups".to_string(),
            retention_limit: 3,
            labels: LabelFormat::default(),
        }
    }
}

/// Snapshot metadata, without the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub slot: i64,
    pub created_at: String,
}

/// Decrypted rows of one snapshot, ready to be written to disk.
#[derive(Clone, Debug)]
pub struct SnapshotDownload {
    pub filename: String,
    pub rows: Vec<Row>,
}

impl SnapshotDownload {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&self.rows)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowFailure {
    pub id: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: u64,
    pub failed: Vec<RowFailure>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SnapshotManager {
    store: Arc<dyn RowStore>,
    codec: Codec,
    options: SnapshotOptions,
    clock: Arc<dyn Clock>,
    cycle: Mutex<()>,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn RowStore>, codec: Codec, options: SnapshotOptions) -> Self {
        Self {
            store,
            codec,
            options,
            clock: Arc::new(SystemClock),
            cycle: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Snapshot the primary table into slot 0, age the existing snapshots
    /// and evict those that fall outside the retention window.
    pub async fn create_snapshot(&self) -> Result<Snapshot, BackupError> {
        let primary = &self.options.primary_table;
        let table = &self.options.snapshot_table;

        let rows = self
            .store
            .select(primary, &Query::all())
            .await
            .map_err(read_err(primary))?;
        let existing = self
            .store
            .select(table, &ordered_slots().columns(&[ID_COLUMN, SLOT]))
            .await
            .map_err(read_err(table))?;

        let payload = self
            .codec
            .encrypt(&Value::Array(rows.into_iter().map(Value::Object).collect()))?;

        let shift_failures = self.shift(existing).await;

        let created_at = self.options.labels.label(self.clock.now());
        let mut row = Row::new();
        row.insert(SLOT.to_string(), json!(0));
        row.insert(CREATED_AT.to_string(), Value::String(created_at.clone()));
        row.insert(DATA.to_string(), Value::String(payload));
        let stored = self
            .store
            .insert(table, row)
            .await
            .map_err(write_err(table))?;
        let id = row_key(&stored, ID_COLUMN).ok_or_else(|| BackupError::StoreWrite {
            table: table.clone(),
            source: StoreError::InvalidRow("store returned a snapshot without an id".into()),
        })?;

        let evicted = self
            .store
            .delete(
                table,
                &Filter::gte(SLOT, i64::from(self.options.retention_limit)),
            )
            .await
            .map_err(write_err(table))?;

        info!(%id, evicted, shift_failures, "snapshot created");
        Ok(Snapshot {
            id,
            slot: 0,
            created_at,
        })
    }

    /// Renumber existing snapshots to `1..=n` in (slot, newest-first) order.
    /// Updates are independent; each failure is logged and counted.
    async fn shift(&self, existing: Vec<Row>) -> usize {
        let table = &self.options.snapshot_table;

        let mut plan = Vec::new();
        for (i, row) in existing.iter().enumerate() {
            let target = i as i64 + 1;
            let Some(id) = row.get(ID_COLUMN).filter(|v| key_text(v).is_some()) else {
                warn!(table = %table, "skipping snapshot row without an id");
                continue;
            };
            if row.get(SLOT).and_then(Value::as_i64) == Some(target) {
                continue;
            }
            let mut patch = Row::new();
            patch.insert(SLOT.to_string(), json!(target));
            plan.push((id.clone(), target, patch));
        }

        let filters: Vec<Filter> = plan
            .iter()
            .map(|(id, _, _)| Filter::Eq(ID_COLUMN.to_string(), id.clone()))
            .collect();
        let results = join_all(
            plan.iter()
                .zip(&filters)
                .map(|((_, _, patch), filter)| self.store.update(table, patch, filter)),
        )
        .await;

        let mut failures = 0;
        for ((id, target, _), result) in plan.iter().zip(results) {
            match result {
                Ok(0) => {
                    debug!(%id, target, "snapshot disappeared before it could be shifted");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%id, target, error = %e, "failed to shift snapshot");
                    failures += 1;
                }
            }
        }
        failures
    }

    /// All snapshots, newest (slot 0) first.
    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>, BackupError> {
        let table = &self.options.snapshot_table;
        let rows = self
            .store
            .select(table, &ordered_slots().columns(&[ID_COLUMN, SLOT, CREATED_AT]))
            .await
            .map_err(read_err(table))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = row_key(row, ID_COLUMN)?;
                let slot = row.get(SLOT).and_then(Value::as_i64)?;
                let created_at = row
                    .get(CREATED_AT)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(Snapshot {
                    id,
                    slot,
                    created_at,
                })
            })
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<Row, BackupError> {
        let table = &self.options.snapshot_table;
        let mut candidates = vec![Value::String(id.to_string())];
        if let Ok(n) = id.parse::<i64>() {
            candidates.push(json!(n));
        }
        for key in candidates {
            let mut rows = self
                .store
                .select(table, &Query::all().filter(Filter::Eq(ID_COLUMN.into(), key)))
                .await
                .map_err(read_err(table))?;
            if !rows.is_empty() {
                return Ok(rows.swap_remove(0));
            }
        }
        Err(BackupError::NotFound(id.to_string()))
    }

    async fn decrypt_rows(&self, id: &str) -> Result<Vec<Row>, BackupError> {
        let row = self.fetch(id).await?;
        let payload = self
            .codec
            .decrypt_value(row.get(DATA).unwrap_or(&Value::Null))
            .map_err(|source| BackupError::Decryption {
                id: id.to_string(),
                source,
            })?;
        rows_from_payload(payload)
    }

    pub async fn download_snapshot(&self, id: &str) -> Result<SnapshotDownload, BackupError> {
        let rows = self.decrypt_rows(id).await?;
        Ok(SnapshotDownload {
            filename: self.options.labels.filename(self.clock.now()),
            rows,
        })
    }

    /// Upsert every row of snapshot `id` into the primary table.
    pub async fn restore_snapshot(&self, id: &str) -> Result<RestoreReport, BackupError> {
        let rows = self.decrypt_rows(id).await?;
        info!(%id, rows = rows.len(), "restoring snapshot");
        Ok(self.apply(rows).await)
    }

    /// Restore from a downloaded backup file. Nothing is written unless the
    /// whole file is a JSON array of rows that each carry an id.
    pub async fn restore_from_json(&self, bytes: &[u8]) -> Result<RestoreReport, BackupError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::InvalidInput(format!("not valid JSON: {}", e)))?;
        let rows = rows_from_payload(value)?;
        info!(rows = rows.len(), "restoring from file");
        Ok(self.apply(rows).await)
    }

    async fn apply(&self, rows: Vec<Row>) -> RestoreReport {
        let table = &self.options.primary_table;
        let mut report = RestoreReport::default();
        for row in rows {
            let id = row_key(&row, ID_COLUMN).unwrap_or_default();
            match self.store.upsert(table, vec![row], ID_COLUMN).await {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    warn!(%id, error = %e, "failed to restore row");
                    report.failed.push(RowFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            restored = report.restored,
            failed = report.failed.len(),
            "restore finished"
        );
        report
    }

    /// One scheduled or manual backup. Cycles in this process never overlap.
    pub async fn run_backup_cycle(&self) -> Result<Snapshot, BackupError> {
        let _guard = self.cycle.lock().await;
        self.create_snapshot().await
    }
}

fn read_err(table: &str) -> impl FnOnce(StoreError) -> BackupError {
    let table = table.to_string();
    move |source| BackupError::StoreRead { table, source }
}

fn write_err(table: &str) -> impl FnOnce(StoreError) -> BackupError {
    let table = table.to_string();
    move |source| BackupError::StoreWrite { table, source }
}

fn ordered_slots() -> Query {
    Query::all()
        .order_by(Order::asc(SLOT))
        .order_by(Order::desc(ID_COLUMN))
}

fn rows_from_payload(value: Value) -> Result<Vec<Row>, BackupError> {
    let Value::Array(items) = value else {
        return Err(BackupError::InvalidInput(
            "expected a JSON array of rows".into(),
        ));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) if row_key(&row, ID_COLUMN).is_some() => Ok(row),
            Value::Object(_) => Err(BackupError::InvalidInput(format!(
                "row {} has no usable id",
                i
            ))),
            _ => Err(BackupError::InvalidInput(format!(
                "row {} is not an object",
                i
            ))),
        })
        .collect()
}
