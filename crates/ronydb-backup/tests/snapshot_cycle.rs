use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use ronydb_backup::{
    run_daily, BackupError, Clock, DailySchedule, LabelFormat, SnapshotManager, SnapshotOptions,
};
use ronydb_crypto::{Codec, KdfParams, Passphrase};
use ronydb_storage::{row_from, Filter, MockRowStore, Query, Row, RowStore, StoreError};
use ronydb_store_memory::MemoryRowStore;
use serde_json::{json, Value};

/// Advances one second every time it is read.
struct StepClock(Mutex<DateTime<Utc>>);

impl StepClock {
    fn starting_at(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(at)))
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let mut t = self.0.lock().unwrap();
        let now = *t;
        *t = now + Duration::seconds(1);
        now
    }
}

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

fn r(v: Value) -> Row {
    row_from(v).unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 21, 0, 0).unwrap()
}

async fn seeded() -> Arc<MemoryRowStore> {
    let store = Arc::new(MemoryRowStore::new());
    store
        .insert("cv_data", r(json!({"id": "main", "data": "v1"})))
        .await
        .unwrap();
    store
}

fn manager(store: Arc<dyn RowStore>) -> SnapshotManager {
    SnapshotManager::new(store, codec("k1"), SnapshotOptions::default())
        .with_clock(StepClock::starting_at(start()))
}

async fn slots(store: &MemoryRowStore) -> Vec<i64> {
    let mut slots: Vec<i64> = store
        .select("cv_backups", &Query::all())
        .await
        .unwrap()
        .iter()
        .map(|r| r["slot"].as_i64().unwrap())
        .collect();
    slots.sort();
    slots
}

#[tokio::test]
async fn retention_window_holds_after_every_create() {
    let store = seeded().await;
    let m = manager(store.clone());

    assert!(m.list_snapshots().await.unwrap().is_empty());

    let mut created = Vec::new();
    for n in 1..=5usize {
        created.push(m.create_snapshot().await.unwrap());
        let list = m.list_snapshots().await.unwrap();
        let expected = n.min(3);
        assert_eq!(list.len(), expected);
        assert_eq!(
            list.iter().map(|s| s.slot).collect::<Vec<_>>(),
            (0..expected as i64).collect::<Vec<_>>()
        );
        assert_eq!(list[0].id, created.last().unwrap().id);
    }

    // the first two have been evicted for good
    let ids: Vec<_> = m
        .list_snapshots()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert!(!ids.contains(&created[0].id));
    assert!(!ids.contains(&created[1].id));
    assert_eq!(ids, vec![created[4].id.clone(), created[3].id.clone(), created[2].id.clone()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_cycles_do_not_interleave() {
    let store = seeded().await;
    let m = Arc::new(manager(store.clone()));

    let (a, b) = tokio::join!(
        {
            let m = m.clone();
            async move { m.run_backup_cycle().await }
        },
        {
            let m = m.clone();
            async move { m.run_backup_cycle().await }
        }
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.id, b.id);

    assert_eq!(slots(&store).await, vec![0, 1]);
    let list = m.list_snapshots().await.unwrap();
    assert_eq!(list.len(), 2);
    assert!(list.iter().any(|s| s.id == a.id));
    assert!(list.iter().any(|s| s.id == b.id));
}

#[tokio::test]
async fn labels_come_from_the_clock() {
    let store = seeded().await;
    let m = manager(store.clone());
    let s = m.create_snapshot().await.unwrap();
    // 21:00:00 UTC at +06:00
    assert_eq!(s.created_at, "Backup created at 2024-06-02 + 03:00:00 BD");
    assert_eq!(m.list_snapshots().await.unwrap()[0].created_at, s.created_at);

    let d = m.download_snapshot(&s.id).await.unwrap();
    assert_eq!(d.filename, "ronydb_backup_2024-06-02_03-00-01_BD.json");
    assert_eq!(
        d.rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
        vec![json!({"id": "main", "data": "v1"})]
    );
}

#[tokio::test]
async fn drifted_slots_are_compacted() {
    let store = seeded().await;
    // leftovers of failed or overlapping runs: duplicate and gapped slots
    for (id, slot) in [("a", 0), ("b", 0), ("c", 2), ("d", 7)] {
        store
            .insert("cv_backups", r(json!({"id": id, "slot": slot, "data": "x"})))
            .await
            .unwrap();
    }

    let m = manager(store.clone());
    let s = m.create_snapshot().await.unwrap();
    assert_eq!(slots(&store).await, vec![0, 1, 2]);

    // among equal slots the larger id is treated as newer
    let list = m.list_snapshots().await.unwrap();
    let ids: Vec<_> = list.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![s.id.as_str(), "b", "a"]);
}

#[tokio::test]
async fn restore_overwrites_and_is_idempotent() {
    let store = seeded().await;
    let m = manager(store.clone());
    let snap = m.create_snapshot().await.unwrap();

    store
        .update(
            "cv_data",
            &r(json!({"data": "v2", "extra": true})),
            &Filter::eq("id", "main"),
        )
        .await
        .unwrap();

    let first = m.restore_snapshot(&snap.id).await.unwrap();
    assert_eq!(first.restored, 1);
    assert!(first.is_complete());
    let once = store.select("cv_data", &Query::all()).await.unwrap();

    m.restore_snapshot(&snap.id).await.unwrap();
    let twice = store.select("cv_data", &Query::all()).await.unwrap();
    assert_eq!(once, twice);
    assert_eq!(once[0]["data"], json!("v1"));
}

#[tokio::test]
async fn missing_and_undecryptable_snapshots() {
    let store = seeded().await;
    let m = manager(store.clone());
    assert!(matches!(
        m.download_snapshot("nope").await,
        Err(BackupError::NotFound(_))
    ));

    let snap = m.create_snapshot().await.unwrap();
    let other = SnapshotManager::new(store.clone(), codec("k2"), SnapshotOptions::default());
    assert!(matches!(
        other.restore_snapshot(&snap.id).await,
        Err(BackupError::Decryption { .. })
    ));
    // nothing was touched
    assert_eq!(
        store.select("cv_data", &Query::all()).await.unwrap()[0]["data"],
        json!("v1")
    );
}

#[tokio::test]
async fn restore_from_json_validates_before_writing() {
    let store = Arc::new(MemoryRowStore::new());
    let m = manager(store.clone());

    for bad in [
        &b"not json"[..],
        br#"{"id": "main"}"#,
        br#"[{"id": "ok"}, {"no_id": 1}]"#,
        br#"[{"id": "ok"}, 7]"#,
    ] {
        assert!(matches!(
            m.restore_from_json(bad).await,
            Err(BackupError::InvalidInput(_))
        ));
    }
    assert!(store.select("cv_data", &Query::all()).await.unwrap().is_empty());

    let report = m
        .restore_from_json(br#"[{"id": "main", "data": "from-file"}, {"id": 2}]"#)
        .await
        .unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(store.select("cv_data", &Query::all()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_primary_read_aborts_before_any_write() {
    let mut store = MockRowStore::new();
    store
        .expect_select()
        .withf(|table, _| table == "cv_data")
        .returning(|_, _| Err(StoreError::Backend("connection reset".into())));
    store.expect_update().never();
    store.expect_insert().never();
    store.expect_delete().never();

    let m = manager(Arc::new(store));
    assert!(matches!(
        m.run_backup_cycle().await,
        Err(BackupError::StoreRead { ref table, .. }) if table == "cv_data"
    ));
}

#[tokio::test]
async fn failed_shift_does_not_stop_the_cycle() {
    let mut store = MockRowStore::new();
    store
        .expect_select()
        .withf(|table, _| table == "cv_data")
        .returning(|_, _| Ok(vec![row_from(json!({"id": "main"})).unwrap()]));
    store
        .expect_select()
        .withf(|table, _| table == "cv_backups")
        .returning(|_, _| {
            Ok(vec![
                row_from(json!({"id": "a", "slot": 0})).unwrap(),
                row_from(json!({"id": "b", "slot": 1})).unwrap(),
            ])
        });
    store
        .expect_update()
        .times(2)
        .returning(|_, _, filter| match filter {
            Filter::Eq(_, v) if *v == json!("a") => Err(StoreError::Backend("timeout".into())),
            _ => Ok(1),
        });
    store
        .expect_insert()
        .times(1)
        .returning(|_, mut row| {
            row.insert("id".into(), json!("new"));
            Ok(row)
        });
    store
        .expect_delete()
        .times(1)
        .withf(|_, filter| *filter == Filter::gte("slot", 3))
        .returning(|_, _| Ok(0));

    let m = manager(Arc::new(store));
    let s = m.run_backup_cycle().await.unwrap();
    assert_eq!(s.id, "new");
    assert_eq!(s.slot, 0);
}

#[tokio::test]
async fn failed_eviction_is_a_write_error() {
    let mut store = MockRowStore::new();
    store.expect_select().returning(|_, _| Ok(vec![]));
    store.expect_insert().returning(|_, mut row| {
        row.insert("id".into(), json!("new"));
        Ok(row)
    });
    store
        .expect_delete()
        .returning(|_, _| Err(StoreError::Backend("read only".into())));

    let m = manager(Arc::new(store));
    assert!(matches!(
        m.create_snapshot().await,
        Err(BackupError::StoreWrite { .. })
    ));
}

#[tokio::test]
async fn custom_retention_and_labels() {
    let store = seeded().await;
    let m = SnapshotManager::new(
        store.clone(),
        codec("k1"),
        SnapshotOptions {
            retention_limit: 1,
            labels: LabelFormat {
                offset: FixedOffset::east_opt(0).unwrap(),
                zone_suffix: "UTC".into(),
                file_prefix: "cv".into(),
            },
            ..SnapshotOptions::default()
        },
    )
    .with_clock(StepClock::starting_at(start()));

    m.create_snapshot().await.unwrap();
    let last = m.create_snapshot().await.unwrap();
    assert_eq!(last.created_at, "Backup created at 2024-06-01 + 21:00:01 UTC");
    let list = m.list_snapshots().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, last.id);
}

#[tokio::test(start_paused = true)]
async fn daily_loop_runs_until_shutdown() {
    let store = seeded().await;
    // 02:59:00 at +06:00, one minute before the daily run
    let fixed = Utc.with_ymd_and_hms(2024, 6, 1, 20, 59, 0).unwrap();
    struct Frozen(DateTime<Utc>);
    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }
    let m = Arc::new(
        SnapshotManager::new(store.clone(), codec("k1"), SnapshotOptions::default())
            .with_clock(Arc::new(Frozen(fixed))),
    );
    let schedule = DailySchedule::new(
        NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
        FixedOffset::east_opt(6 * 3600).unwrap(),
    );

    // the frozen clock makes every wait one minute long
    run_daily(
        m.clone(),
        schedule,
        tokio::time::sleep(std::time::Duration::from_secs(150)),
    )
    .await;

    assert_eq!(m.list_snapshots().await.unwrap().len(), 2);
}
