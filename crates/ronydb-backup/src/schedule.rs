use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use tracing::{error, info};

use crate::SnapshotManager;

/// A fixed time of day in a fixed offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailySchedule {
    pub at: NaiveTime,
    pub offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(at: NaiveTime, offset: FixedOffset) -> Self {
        Self { at, offset }
    }

    /// First occurrence strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset).naive_local();
        let mut candidate = local.date().and_time(self.at);
        if candidate <= local {
            candidate += Duration::days(1);
        }
        let utc = candidate - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    pub fn delay_until_next(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.next_after(now) - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Run a backup cycle at every occurrence of `schedule` until `shutdown`
/// resolves. A failed cycle is logged and the loop carries on.
pub async fn run_daily<F>(manager: Arc<SnapshotManager>, schedule: DailySchedule, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let now = manager.now();
        let next = schedule.next_after(now);
        info!(next = %next.with_timezone(&schedule.offset), "next backup scheduled");

        tokio::select! {
            _ = &mut shutdown => {
                info!("scheduler stopping");
                return;
            }
            _ = tokio::time::sleep(schedule.delay_until_next(now)) => {}
        }

        match manager.run_backup_cycle().await {
            Ok(snapshot) => {
                info!(id = %snapshot.id, label = %snapshot.created_at, "scheduled backup done")
            }
            Err(e) => error!(error = %e, "scheduled backup failed"),
        }
    }
}
