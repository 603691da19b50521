/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, histogram_opts, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // 同期ジョブ
    pub sync_runs: Counter,
    pub sync_failures: Counter,
    pub sync_empty: Counter,
    pub sync_articles: Gauge,
    pub sync_duration: Histogram,

    // Analytics
    pub analytics_rows: Counter,
    pub analytics_rows_discarded: Counter,

    // 表示側の解決
    pub resolve_failures: Counter,
    pub fallback_padded: Counter,

    // 上流呼び出し
    pub upstream_retries: Counter,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成し、`registry` に登録する。
    ///
    /// # Errors
    /// 同名メトリクスが既に登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            sync_runs: register_counter_with_registry!(
                "popular_sync_runs_total",
                "Total number of popular-articles sync runs",
                registry
            )?,
            sync_failures: register_counter_with_registry!(
                "popular_sync_failures_total",
                "Total number of sync runs that failed",
                registry
            )?,
            sync_empty: register_counter_with_registry!(
                "popular_sync_empty_total",
                "Total number of sync runs skipped because analytics returned no data",
                registry
            )?,
            sync_articles: register_gauge_with_registry!(
                "popular_sync_articles",
                "Number of article ids written by the last successful sync",
                registry
            )?,
            sync_duration: register_histogram_with_registry!(
                histogram_opts!(
                    "popular_sync_duration_seconds",
                    "Duration of popular-articles sync runs",
                    vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
                ),
                registry
            )?,
            analytics_rows: register_counter_with_registry!(
                "popular_analytics_rows_total",
                "Total number of page-view rows returned by analytics",
                registry
            )?,
            analytics_rows_discarded: register_counter_with_registry!(
                "popular_analytics_rows_discarded_total",
                "Page-view rows discarded because no article id could be extracted",
                registry
            )?,
            resolve_failures: register_counter_with_registry!(
                "popular_resolve_failures_total",
                "Popular-article resolutions that degraded to an empty list",
                registry
            )?,
            fallback_padded: register_counter_with_registry!(
                "popular_fallback_padded_total",
                "Number of newest articles used to pad the popular list",
                registry
            )?,
            upstream_retries: register_counter_with_registry!(
                "popular_upstream_retries_total",
                "Retries issued against analytics or CMS",
                registry
            )?,
        })
    }
}
