use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    model::{ArticleId, DateRange},
    observability::metrics::Metrics,
    ranking::{AnalyticsReader, RankingStore},
};

/// Analytics からデータが得られなかったときの理由。
pub const NO_DATA_REASON: &str = "no data returned from analytics";

/// 同期ジョブ1回分の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// ランキングレコードを `ids` で置き換えた。
    Synced { ids: Vec<ArticleId> },
    /// Analytics が空だったため書き込みを行わなかった。
    NoData { reason: String },
}

impl SyncOutcome {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    #[must_use]
    pub fn ids(&self) -> &[ArticleId] {
        match self {
            Self::Synced { ids } => ids,
            Self::NoData { .. } => &[],
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.ids().len()
    }
}

/// Analytics の人気記事をランキングレコードへ書き込む同期ジョブ。
///
/// 読み出しが完了して結果が空でない場合にだけ書き込む。レコードは常に全体を置き換えるため、
/// 同じ入力で何度実行しても保存状態は変わらない。
#[derive(Clone)]
pub struct SyncJob {
    reader: AnalyticsReader,
    store: RankingStore,
    metrics: Option<Arc<Metrics>>,
}

impl SyncJob {
    #[must_use]
    pub fn new(reader: AnalyticsReader, store: RankingStore) -> Self {
        Self {
            reader,
            store,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// Analytics への問い合わせ、またはランキングレコードの更新に失敗した場合。
    /// 更新失敗時のエラーには上流のHTTPステータスが含まれる。
    pub async fn run_sync(&self, limit: i64, date_range: &DateRange) -> Result<SyncOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "popular_sync",
            %run_id,
            limit,
            start = %date_range.start,
            end = %date_range.end
        );

        let started = Instant::now();
        let result = self.execute(limit, date_range).instrument(span).await;
        self.record(run_id, started, &result);
        result
    }

    async fn execute(&self, limit: i64, date_range: &DateRange) -> Result<SyncOutcome> {
        let ids = self
            .reader
            .fetch_popular_article_ids(limit, date_range)
            .await
            .context("failed to read popular articles from analytics")?;

        if ids.is_empty() {
            warn!("analytics returned no popular articles; keeping the stored ranking");
            return Ok(SyncOutcome::NoData {
                reason: NO_DATA_REASON.to_string(),
            });
        }

        self.store.write_popular_articles(&ids).await?;
        Ok(SyncOutcome::Synced { ids })
    }

    fn record(&self, run_id: Uuid, started: Instant, result: &Result<SyncOutcome>) {
        let elapsed = started.elapsed();
        match result {
            Ok(SyncOutcome::Synced { ids }) => info!(
                %run_id,
                count = ids.len(),
                elapsed_secs = elapsed.as_secs_f64(),
                "popular articles sync completed"
            ),
            Ok(SyncOutcome::NoData { reason }) => info!(
                %run_id,
                reason = %reason,
                elapsed_secs = elapsed.as_secs_f64(),
                "popular articles sync skipped"
            ),
            Err(err) => error!(
                %run_id,
                error = %format!("{err:#}"),
                elapsed_secs = elapsed.as_secs_f64(),
                "popular articles sync failed"
            ),
        }

        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.sync_runs.inc();
        metrics.sync_duration.observe(elapsed.as_secs_f64());
        match result {
            Ok(SyncOutcome::Synced { ids }) => {
                #[allow(clippy::cast_precision_loss)]
                let count = ids.len() as f64;
                metrics.sync_articles.set(count);
            }
            Ok(SyncOutcome::NoData { .. }) => metrics.sync_empty.inc(),
            Err(_) => metrics.sync_failures.inc(),
        }
    }
}
