/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// AWS推奨のFull Jitter戦略を実装します。
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use tracing::{info, warn};

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub(crate) max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub(crate) base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub(crate) max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub(crate) const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 再試行しない設定。
    #[cfg(test)]
    #[must_use]
    pub(crate) const fn no_retry() -> Self {
        Self::new(1, 0, 0)
    }

    /// 指定された試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// # Arguments
    /// * `attempt` - 試行回数（0から開始）
    #[must_use]
    pub(crate) fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // 指数バックオフ: base * 2^(attempt-1)
        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(63);
        let exponential_delay = self.base_delay_ms.saturating_mul(1_u64 << shift);

        let capped_delay = exponential_delay.min(self.max_delay_ms);

        // Full Jitter: random(0, capped_delay)
        let jittered_delay = if capped_delay > 0 {
            rand::rng().random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    /// この試行回数が再試行可能かどうかを判定する。
    #[must_use]
    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// 再試行可能なHTTPステータス（5xx と 429）かどうか。
#[must_use]
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// ネットワークエラー・タイムアウト・再試行可能ステータスを再試行対象とする。
#[must_use]
pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }

    error.status().is_some_and(is_retryable_status)
}

/// `operation` を再試行付きで実行する。
///
/// `is_retryable` が `false` を返すエラーは即座に呼び出し元へ返す。
/// 再試行のたびに `on_retry` が呼ばれる。
pub(crate) async fn retry_with_backoff<T, E, F, Fut, P, R>(
    config: RetryConfig,
    operation: &'static str,
    is_retryable: P,
    on_retry: R,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    R: Fn(),
    E: Display,
{
    let mut attempt = 0;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "upstream call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                attempt += 1;

                if !is_retryable(&err) {
                    return Err(err);
                }

                if !config.can_retry(attempt) {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = config.max_attempts,
                        error = %err,
                        "upstream call failed after all retries"
                    );
                    return Err(err);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "upstream call failed, retrying after delay"
                );
                on_retry();
                tokio::time::sleep(delay).await;
            }
        }
    }
}
