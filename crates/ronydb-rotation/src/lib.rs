//! Re-encrypt stored ciphertext under a new passphrase.
//!
//! Rows are processed one at a time and independently: a row that cannot be
//! opened under the old passphrase is skipped, a row that cannot be sealed
//! under the new one or whose write fails is recorded as failed, and neither
//! stops the rest of the table. The new passphrase is handed to the
//! [`PassphraseSink`] only when nothing failed.
//!
//! Re-running with the same pair after a partial run reports the rows that
//! were already rotated as skipped, since they no longer open under the old
//! passphrase.

use ronydb_crypto::{Codec, Passphrase};
use ronydb_storage::{key_text, Filter, Query, Row, RowStore, StoreError, ID_COLUMN};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("failed to read table '{table}': {source}")]
    StoreRead {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error(
        "rows were re-encrypted but the new passphrase could not be saved ({0}); \
         store it in the passphrase configuration by hand"
    )]
    Persist(String),
    #[error("old and new passphrases are identical")]
    SamePassphrase,
}

/// Where the active passphrase lives once rotation has succeeded.
pub trait PassphraseSink: Send + Sync {
    fn persist(&self, passphrase: &Passphrase) -> Result<(), String>;
}

/// One table to rotate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub encrypted_columns: Vec<String>,
    #[serde(default = "default_key_column")]
    pub key_column: String,
}

fn default_key_column() -> String {
    ID_COLUMN.to_string()
}

impl TableSpec {
    pub fn new(name: impl Into<String>, encrypted_columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            encrypted_columns: encrypted_columns.iter().map(|c| c.to_string()).collect(),
            key_column: default_key_column(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Keys of rows that could not be re-encrypted or whose update errored
    /// or matched nothing.
    pub failed_rows: Vec<String>,
    /// Keys of rows left untouched (`#<index>` when the row had no key).
    pub skipped_rows: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub per_table: BTreeMap<String, TableReport>,
    pub passphrase_persisted: bool,
}

impl RotationReport {
    pub fn total_failed(&self) -> u64 {
        self.per_table.values().map(|t| t.failed).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.per_table.values().map(|t| t.skipped).sum()
    }
}

enum RowOutcome {
    Rotated(Row),
    Skipped(&'static str),
    Failed(String),
}

/// Decrypt every configured column under `old` and re-encrypt the exact
/// plaintext under `new`.
fn reencrypt_row(row: &Row, columns: &[String], old: &Codec, new: &Codec) -> RowOutcome {
    let mut patch = Row::new();
    for column in columns {
        let ciphertext = match row.get(column) {
            Some(Value::String(s)) => s,
            Some(_) => return RowOutcome::Skipped("column is not a string"),
            None => return RowOutcome::Skipped("column is missing"),
        };
        let plaintext = match old.decrypt_str(ciphertext) {
            Ok(p) => p,
            Err(_) => return RowOutcome::Skipped("does not decrypt under the old passphrase"),
        };
        match new.encrypt_str(&plaintext) {
            Ok(c) => {
                patch.insert(column.clone(), Value::String(c));
            }
            Err(e) => return RowOutcome::Failed(e.to_string()),
        }
    }
    RowOutcome::Rotated(patch)
}

async fn rotate_table(
    store: &dyn RowStore,
    spec: &TableSpec,
    old: &Codec,
    new: &Codec,
) -> Result<TableReport, RotationError> {
    let mut columns: Vec<&str> = vec![spec.key_column.as_str()];
    columns.extend(spec.encrypted_columns.iter().map(String::as_str));

    let rows = store
        .select(&spec.name, &Query::all().columns(&columns))
        .await
        .map_err(|source| RotationError::StoreRead {
            table: spec.name.clone(),
            source,
        })?;

    let mut report = TableReport::default();

    for (index, row) in rows.iter().enumerate() {
        let key_value = row.get(&spec.key_column).cloned();
        let Some(key) = key_value.as_ref().and_then(key_text) else {
            warn!(table = %spec.name, index, "skipping row without a usable key");
            report.skipped += 1;
            report.skipped_rows.push(format!("#{}", index));
            continue;
        };

        let patch = match reencrypt_row(row, &spec.encrypted_columns, old, new) {
            RowOutcome::Rotated(patch) => patch,
            RowOutcome::Skipped(reason) => {
                warn!(table = %spec.name, %key, reason, "skipping row");
                report.skipped += 1;
                report.skipped_rows.push(key);
                continue;
            }
            RowOutcome::Failed(error) => {
                warn!(table = %spec.name, %key, %error, "failed to re-encrypt row");
                report.failed += 1;
                report.failed_rows.push(key);
                continue;
            }
        };

        let filter = Filter::Eq(spec.key_column.clone(), key_value.unwrap_or(Value::Null));
        match store.update(&spec.name, &patch, &filter).await {
            Ok(0) => {
                warn!(table = %spec.name, %key, "row vanished before it could be updated");
                report.failed += 1;
                report.failed_rows.push(key);
            }
            Ok(_) => report.succeeded += 1,
            Err(e) => {
                warn!(table = %spec.name, %key, error = %e, "failed to update row");
                report.failed += 1;
                report.failed_rows.push(key);
            }
        }
    }

    info!(
        table = %spec.name,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed,
        "table rotated"
    );
    Ok(report)
}

/// Rotate every table in `tables` from `old` to `new`, then persist the new
/// passphrase through `sink` if and only if no row failed.
pub async fn rotate(
    store: &dyn RowStore,
    old: &Codec,
    new: &Codec,
    tables: &[TableSpec],
    sink: &dyn PassphraseSink,
) -> Result<RotationReport, RotationError> {
    if old.passphrase().expose() == new.passphrase().expose() {
        return Err(RotationError::SamePassphrase);
    }

    let mut report = RotationReport::default();
    for spec in tables {
        let table = rotate_table(store, spec, old, new).await?;
        report.per_table.insert(spec.name.clone(), table);
    }

    let failed = report.total_failed();
    if failed > 0 {
        warn!(failed, "rotation had failures; passphrase configuration left unchanged");
        return Ok(report);
    }

    sink.persist(new.passphrase()).map_err(RotationError::Persist)?;
    report.passphrase_persisted = true;
    info!(skipped = report.total_skipped(), "rotation complete; new passphrase saved");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ronydb_crypto::KdfParams;
    use ronydb_storage::{row_from, MockRowStore};
    use ronydb_store_memory::MemoryRowStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn codec(p: &str) -> Codec {
        Codec::new(
            Passphrase::new(p),
            KdfParams {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
        )
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Option<String>>,
        fail: bool,
    }

    impl PassphraseSink for RecordingSink {
        fn persist(&self, passphrase: &Passphrase) -> Result<(), String> {
            if self.fail {
                return Err("disk full".into());
            }
            *self.saved.lock().unwrap() = Some(passphrase.expose().to_string());
            Ok(())
        }
    }

    async fn seed(store: &MemoryRowStore, old: &Codec) {
        for i in 0..5 {
            let data = if i == 2 {
                "rdb1:not-really-ciphertext".to_string()
            } else {
                old.encrypt(&json!({"name": "Rony", "n": i})).unwrap()
            };
            store
                .insert(
                    "cv_data",
                    row_from(json!({"id": format!("r{}", i), "data": data})).unwrap(),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn corrupt_row_is_skipped_and_config_updated() {
        let store = MemoryRowStore::new();
        let (old, new) = (codec("old"), codec("new"));
        seed(&store, &old).await;
        let sink = RecordingSink::default();

        let report = rotate(
            &store,
            &old,
            &new,
            &[TableSpec::new("cv_data", &["data"])],
            &sink,
        )
        .await
        .unwrap();

        let t = &report.per_table["cv_data"];
        assert_eq!((t.succeeded, t.skipped, t.failed), (4, 1, 0));
        assert_eq!(t.skipped_rows, vec!["r2".to_string()]);
        assert!(report.passphrase_persisted);
        assert_eq!(sink.saved.lock().unwrap().as_deref(), Some("new"));

        let rows = store.select("cv_data", &Query::all()).await.unwrap();
        for row in rows.iter().filter(|r| r["id"] != json!("r2")) {
            assert!(old.decrypt_value(&row["data"]).is_err());
            assert_eq!(new.decrypt_value(&row["data"]).unwrap()["name"], json!("Rony"));
        }
    }

    #[tokio::test]
    async fn reencryption_keeps_plaintext_bytes() {
        let store = MemoryRowStore::new();
        let (old, new) = (codec("old"), codec("new"));
        // not canonical JSON on purpose
        let raw = "{ \"b\": 1,   \"a\": 2 }";
        store
            .insert(
                "cv_data",
                row_from(json!({"id": 1, "data": old.encrypt_str(raw).unwrap()})).unwrap(),
            )
            .await
            .unwrap();

        rotate(
            &store,
            &old,
            &new,
            &[TableSpec::new("cv_data", &["data"])],
            &RecordingSink::default(),
        )
        .await
        .unwrap();

        let rows = store.select("cv_data", &Query::all()).await.unwrap();
        let ct = rows[0]["data"].as_str().unwrap();
        assert_eq!(new.decrypt_str(ct).unwrap().as_str(), raw);
    }

    #[tokio::test]
    async fn missing_or_non_string_columns_and_keys_are_skipped() {
        let store = MemoryRowStore::new();
        let (old, new) = (codec("old"), codec("new"));
        let good = old.encrypt(&json!("secret")).unwrap();
        for row in [
            json!({"id": "a", "data": good.clone(), "extra": good.clone()}),
            json!({"id": "b", "data": good.clone()}),
            json!({"id": "c", "data": good.clone(), "extra": 42}),
        ] {
            store.insert("t", row_from(row).unwrap()).await.unwrap();
        }

        let report = rotate(
            &store,
            &old,
            &new,
            &[TableSpec {
                name: "t".into(),
                encrypted_columns: vec!["data".into(), "extra".into()],
                key_column: "id".into(),
            }],
            &RecordingSink::default(),
        )
        .await
        .unwrap();

        let t = &report.per_table["t"];
        assert_eq!((t.succeeded, t.skipped, t.failed), (1, 2, 0));

        let keyless = TableSpec {
            name: "t".into(),
            encrypted_columns: vec!["data".into()],
            key_column: "owner".into(),
        };
        let report = rotate(&store, &new, &old, &[keyless], &RecordingSink::default())
            .await
            .unwrap();
        assert_eq!(report.per_table["t"].skipped_rows, vec!["#0", "#1", "#2"]);
    }

    #[tokio::test]
    async fn failed_update_leaves_config_untouched() {
        let (old, new) = (codec("old"), codec("new"));
        let rows: Vec<Row> = (0..3)
            .map(|i| {
                row_from(json!({"id": i, "data": old.encrypt(&json!({"i": i})).unwrap()}))
                    .unwrap()
            })
            .collect();

        let mut store = MockRowStore::new();
        store
            .expect_select()
            .returning(move |_, _| Ok(rows.clone()));
        store.expect_update().returning(|_, _, filter| match filter {
            Filter::Eq(_, v) if *v == json!(1) => Err(StoreError::Backend("timeout".into())),
            Filter::Eq(_, v) if *v == json!(2) => Ok(0),
            _ => Ok(1),
        });

        let sink = RecordingSink::default();
        let report = rotate(
            &store,
            &old,
            &new,
            &[TableSpec::new("cv_data", &["data"])],
            &sink,
        )
        .await
        .unwrap();

        let t = &report.per_table["cv_data"];
        assert_eq!((t.succeeded, t.skipped, t.failed), (1, 0, 2));
        assert_eq!(t.failed_rows, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(report.total_failed(), 2);
        assert!(!report.passphrase_persisted);
        assert!(sink.saved.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn unusable_new_codec_fails_rows_and_keeps_config() {
        let store = MemoryRowStore::new();
        let old = codec("old");
        let broken = Codec::new(
            Passphrase::new("new"),
            KdfParams {
                memory_kib: 1,
                iterations: 1,
                parallelism: 1,
            },
        );
        for i in 0..3 {
            let data = old.encrypt(&json!({"i": i})).unwrap();
            store
                .insert("cv_data", row_from(json!({"id": i, "data": data})).unwrap())
                .await
                .unwrap();
        }
        let sink = RecordingSink::default();

        let report = rotate(
            &store,
            &old,
            &broken,
            &[TableSpec::new("cv_data", &["data"])],
            &sink,
        )
        .await
        .unwrap();

        let t = &report.per_table["cv_data"];
        assert_eq!((t.succeeded, t.skipped, t.failed), (0, 0, 3));
        assert_eq!(t.failed_rows, vec!["0", "1", "2"]);
        assert!(!report.passphrase_persisted);
        assert!(sink.saved.lock().unwrap().is_none());

        // data is still readable under the passphrase that stays configured
        for row in store.select("cv_data", &Query::all()).await.unwrap() {
            assert!(old.decrypt_value(&row["data"]).is_ok());
        }
    }

    #[tokio::test]
    async fn unreadable_table_aborts_without_persisting() {
        let mut store = MockRowStore::new();
        store
            .expect_select()
            .returning(|_, _| Err(StoreError::Backend("connection refused".into())));
        store.expect_update().never();

        let sink = RecordingSink::default();
        let err = rotate(
            &store,
            &codec("old"),
            &codec("new"),
            &[TableSpec::new("cv_data", &["data"])],
            &sink,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RotationError::StoreRead { ref table, .. } if table == "cv_data"));
        assert!(sink.saved.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn persist_failure_is_reported_without_the_passphrase() {
        let store = MemoryRowStore::new();
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let err = rotate(
            &store,
            &codec("old"),
            &codec("hunter2"),
            &[TableSpec::new("cv_data", &["data"])],
            &sink,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RotationError::Persist(_)));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn same_passphrase_is_rejected() {
        let store = MemoryRowStore::new();
        let err = rotate(
            &store,
            &codec("k1"),
            &codec("k1"),
            &[],
            &RecordingSink::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RotationError::SamePassphrase));
    }

    #[test]
    fn table_spec_key_column_defaults_to_id() {
        let spec: TableSpec =
            serde_json::from_value(json!({"name": "cv_data", "encrypted_columns": ["data"]}))
                .unwrap();
        assert_eq!(spec, TableSpec::new("cv_data", &["data"]));
    }
}
