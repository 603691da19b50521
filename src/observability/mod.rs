pub mod metrics;
pub(crate) mod tracing;

use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// Telemetry（メトリクスとトレーシング）を管理する構造体。
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// トレーシングを初期化し、専用レジストリにメトリクスを登録する。
    ///
    /// # Errors
    /// サブスクライバの初期化またはメトリクス登録に失敗した場合。
    pub fn new() -> Result<Self> {
        tracing::init()?;
        Self::metrics_only()
    }

    /// トレーシングに触れずにメトリクスだけを用意する。
    ///
    /// # Errors
    /// メトリクス登録に失敗した場合。
    pub fn metrics_only() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(Arc::clone(&registry))?);
        Ok(Self { registry, metrics })
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn record_ready_probe(&self) {
        ::tracing::debug!("service ready probe");
    }

    pub fn record_live_probe(&self) {
        ::tracing::debug!("service live probe");
    }

    /// 同期エンドポイントの呼び出しを記録する。
    pub fn record_sync_trigger(&self, method: &str) {
        ::tracing::info!(method, "popular articles sync triggered");
    }

    /// Prometheus テキスト形式でメトリクスを出力する。
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
            ::tracing::warn!(%error, "failed to encode prometheus metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Telemetry;
    use crate::config::{Config, ENV_MUTEX, test_env::reset_env};

    #[test]
    fn render_includes_registered_metrics() {
        let telemetry = Telemetry::metrics_only().expect("telemetry");
        telemetry.metrics().sync_runs.inc();

        let rendered = telemetry.render_prometheus();

        assert!(rendered.contains("popular_sync_runs_total 1"));
        assert!(rendered.contains("popular_upstream_retries_total 0"));
    }

    #[test]
    fn registries_are_isolated_per_instance() {
        let first = Telemetry::metrics_only().expect("first");
        let second = Telemetry::metrics_only().expect("second");
        first.metrics().sync_failures.inc();

        assert!(second.render_prometheus().contains("popular_sync_failures_total 0"));
    }

    #[test]
    fn tracing_initialises_before_configuration_is_loaded() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();

        let first = Telemetry::new().expect("tracing without any configuration");
        let second = Telemetry::new().expect("repeated init is a no-op");
        assert!(Config::from_env().is_err());

        first.metrics().sync_runs.inc();
        assert!(second.render_prometheus().contains("popular_sync_runs_total 0"));
    }
}
