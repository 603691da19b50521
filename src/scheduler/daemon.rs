use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info};

use crate::{
    model::DateRange,
    scheduler::{SyncJob, cadence::DailyCadence},
};

const JST_OFFSET_SECONDS: i32 = 9 * 3600;

/// 毎日 `at`（JST）に同期ジョブを起動するデーモンを生成する。
///
/// # Errors
/// タイムゾーンの構築に失敗した場合。
pub fn spawn_jst_sync_daemon(
    job: SyncJob,
    at: NaiveTime,
    limit: usize,
    date_range: DateRange,
) -> Result<JoinHandle<()>> {
    let tz = FixedOffset::east_opt(JST_OFFSET_SECONDS).context("invalid JST offset")?;
    let cadence = DailyCadence::new(tz, at);
    Ok(SyncDaemon {
        job,
        cadence,
        limit: i64::try_from(limit).unwrap_or(i64::MAX),
        date_range,
        tz,
    }
    .spawn())
}

struct SyncDaemon {
    job: SyncJob,
    cadence: DailyCadence,
    limit: i64,
    date_range: DateRange,
    tz: FixedOffset,
}

impl SyncDaemon {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        loop {
            let now = Utc::now();
            let Some(next) = self.cadence.next_run_from(now) else {
                error!("could not compute next sync time; stopping daily sync daemon");
                return;
            };
            let wait = duration_until(next, now);
            info!(
                next_run_utc = %next.to_rfc3339(),
                next_run_jst = %next.with_timezone(&self.tz).to_rfc3339(),
                wait_seconds = wait.as_secs(),
                "scheduled daily popular articles sync"
            );
            sleep(wait).await;

            // 結果のログとメトリクスはジョブ側で記録される
            if self.job.run_sync(self.limit, &self.date_range).await.is_err() {
                info!("daily sync failed; will retry at the next scheduled time");
            }

            // 同じ分の内に再実行しないよう、起動時刻を過ぎてから次回を計算する
            if Utc::now() <= next {
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn duration_until(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
