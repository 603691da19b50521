use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    model::{ArticleId, DateRange},
    observability::metrics::Metrics,
};

use super::extract::{extract_article_id, rank_article_ids};

/// Analytics が返すパス単位のページビュー。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageViewRecord {
    pub path: String,
    pub view_count: u64,
}

/// ページビュー取得の問い合わせ条件。結果は閲覧数の降順で返ることを期待する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageViewQuery {
    pub path_prefix: String,
    pub date_range: DateRange,
    pub row_limit: usize,
}

/// パス別ページビューの取得元。
#[async_trait]
pub trait PageViewSource: Send + Sync {
    async fn page_views(&self, query: &PageViewQuery) -> Result<Vec<PageViewRecord>>;
}

/// Analytics から人気記事IDを読み出す。
///
/// 資格情報が未設定（`source` が `None`）の場合は警告を出して空を返す。
/// 問い合わせ自体の失敗は呼び出し元へ伝播する。
#[derive(Clone)]
pub struct AnalyticsReader {
    source: Option<Arc<dyn PageViewSource>>,
    path_prefix: String,
    overfetch_factor: NonZeroUsize,
    metrics: Option<Arc<Metrics>>,
}

impl AnalyticsReader {
    pub const DEFAULT_OVERFETCH_FACTOR: NonZeroUsize = NonZeroUsize::new(3).unwrap();

    #[must_use]
    pub fn new(source: Option<Arc<dyn PageViewSource>>, path_prefix: impl Into<String>) -> Self {
        Self {
            source,
            path_prefix: path_prefix.into(),
            overfetch_factor: Self::DEFAULT_OVERFETCH_FACTOR,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_overfetch_factor(mut self, factor: NonZeroUsize) -> Self {
        self.overfetch_factor = factor;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// 期間内の閲覧数上位の記事IDを、重複なし・閲覧数順で最大 `limit` 件返す。
    ///
    /// `limit` が0以下なら問い合わせずに空を返す。
    ///
    /// # Errors
    /// Analytics への問い合わせが失敗した場合。
    pub async fn fetch_popular_article_ids(
        &self,
        limit: i64,
        date_range: &DateRange,
    ) -> Result<Vec<ArticleId>> {
        let Some(limit) = usize::try_from(limit).ok().filter(|limit| *limit > 0) else {
            return Ok(Vec::new());
        };

        let Some(source) = &self.source else {
            warn!("analytics credentials are not configured; returning no popular articles");
            return Ok(Vec::new());
        };

        let query = PageViewQuery {
            path_prefix: self.path_prefix.clone(),
            date_range: *date_range,
            row_limit: limit.saturating_mul(self.overfetch_factor.get()),
        };

        let records = source
            .page_views(&query)
            .await
            .context("analytics page-view query failed")?;

        let ranked = rank_article_ids(&records, &self.path_prefix, limit);

        let discarded = records
            .iter()
            .filter(|record| extract_article_id(&record.path, &self.path_prefix).is_none())
            .count();
        if discarded > 0 {
            debug!(discarded, "discarded page-view rows without an article id");
        }
        if let Some(metrics) = &self.metrics {
            #[allow(clippy::cast_precision_loss)]
            let (rows, dropped) = (records.len() as f64, discarded as f64);
            metrics.analytics_rows.inc_by(rows);
            metrics.analytics_rows_discarded.inc_by(dropped);
        }

        info!(
            rows = records.len(),
            ranked = ranked.len(),
            limit,
            start = %date_range.start,
            end = %date_range.end,
            "ranked popular articles from analytics"
        );

        Ok(ranked)
    }
}
