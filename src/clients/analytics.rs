/// Analytics Data API の `runReport` クライアント。
///
/// 記事パスごとのページビュー数を期間指定で取得します。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use prometheus::Counter;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::google_auth::{ANALYTICS_READONLY_SCOPE, ServiceAccountTokenProvider};
use crate::{
    config::AnalyticsCredentials,
    ranking::reader::{PageViewQuery, PageViewRecord, PageViewSource},
    util::retry::{RetryConfig, is_retryable_error, is_retryable_status, retry_with_backoff},
};

const PAGE_PATH_DIMENSION: &str = "pagePath";
const VIEW_COUNT_METRIC: &str = "screenPageViews";

#[derive(Debug, Error)]
pub(crate) enum AnalyticsError {
    #[error("failed to obtain analytics access token: {0:#}")]
    Auth(anyhow::Error),
    #[error("analytics request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("analytics returned error status {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("failed to deserialize analytics report: {0}")]
    Decode(#[source] reqwest::Error),
}

impl AnalyticsError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(error) => is_retryable_error(error),
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Auth(_) | Self::Decode(_) => false,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportRequest<'a> {
    date_ranges: [ReportDateRange; 1],
    dimensions: [NamedField<'a>; 1],
    metrics: [NamedField<'a>; 1],
    dimension_filter: DimensionFilter<'a>,
    order_bys: [OrderBy<'a>; 1],
    limit: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportDateRange {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Serialize)]
struct NamedField<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct DimensionFilter<'a> {
    filter: FieldFilter<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldFilter<'a> {
    field_name: &'a str,
    string_filter: StringFilter<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StringFilter<'a> {
    match_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct OrderBy<'a> {
    metric: MetricOrder<'a>,
    desc: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricOrder<'a> {
    metric_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    rows: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    #[serde(default)]
    dimension_values: Vec<ReportValue>,
    #[serde(default)]
    metric_values: Vec<ReportValue>,
}

#[derive(Debug, Deserialize)]
struct ReportValue {
    #[serde(default)]
    value: Option<String>,
}

/// Analytics クライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct AnalyticsConfig {
    pub(crate) api_base_url: String,
    pub(crate) token_url: String,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryConfig,
}

/// Analytics Data API との通信を管理するクライアント。
#[derive(Debug)]
pub(crate) struct AnalyticsClient {
    client: Client,
    report_url: Url,
    tokens: ServiceAccountTokenProvider,
    retry: RetryConfig,
    retries_total: Option<Counter>,
}

impl AnalyticsClient {
    /// 資格情報からクライアントを構築する。プロセスにつき一度だけ呼ばれる想定。
    ///
    /// # Errors
    /// URLや秘密鍵のパース、HTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(credentials: &AnalyticsCredentials, config: AnalyticsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build analytics HTTP client")?;
        let report_url = Url::parse(&config.api_base_url)
            .and_then(|base| {
                base.join(&format!(
                    "v1beta/properties/{}:runReport",
                    credentials.property_id
                ))
            })
            .context("invalid analytics base URL")?;
        let tokens = ServiceAccountTokenProvider::new(
            &config.token_url,
            credentials.client_email.clone(),
            &credentials.private_key,
            ANALYTICS_READONLY_SCOPE,
            config.timeout,
        )?;

        Ok(Self {
            client,
            report_url,
            tokens,
            retry: config.retry,
            retries_total: None,
        })
    }

    #[must_use]
    pub(crate) fn with_retry_counter(mut self, counter: Counter) -> Self {
        self.retries_total = Some(counter);
        self
    }

    async fn run_report(&self, query: &PageViewQuery) -> Result<Vec<PageViewRecord>, AnalyticsError> {
        let body = RunReportRequest {
            date_ranges: [ReportDateRange {
                start_date: query.date_range.start.to_string(),
                end_date: query.date_range.end.to_string(),
            }],
            dimensions: [NamedField {
                name: PAGE_PATH_DIMENSION,
            }],
            metrics: [NamedField {
                name: VIEW_COUNT_METRIC,
            }],
            dimension_filter: DimensionFilter {
                filter: FieldFilter {
                    field_name: PAGE_PATH_DIMENSION,
                    string_filter: StringFilter {
                        match_type: "BEGINS_WITH",
                        value: &query.path_prefix,
                    },
                },
            },
            order_bys: [OrderBy {
                metric: MetricOrder {
                    metric_name: VIEW_COUNT_METRIC,
                },
                desc: true,
            }],
            limit: query.row_limit.to_string(),
        };

        let token = self
            .tokens
            .access_token()
            .await
            .map_err(AnalyticsError::Auth)?;

        let response = self
            .client
            .post(self.report_url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(AnalyticsError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Status { status, message });
        }

        let report: RunReportResponse = response.json().await.map_err(AnalyticsError::Decode)?;

        let records: Vec<PageViewRecord> = report
            .rows
            .into_iter()
            .filter_map(|row| {
                let path = row.dimension_values.into_iter().next()?.value?;
                let view_count = row
                    .metric_values
                    .into_iter()
                    .next()
                    .and_then(|value| value.value)
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(0);
                Some(PageViewRecord { path, view_count })
            })
            .collect();

        debug!(rows = records.len(), "fetched analytics report rows");
        Ok(records)
    }
}

#[async_trait]
impl PageViewSource for AnalyticsClient {
    async fn page_views(&self, query: &PageViewQuery) -> Result<Vec<PageViewRecord>> {
        let records = retry_with_backoff(
            self.retry,
            "analytics.run_report",
            AnalyticsError::is_retryable,
            || {
                if let Some(counter) = &self.retries_total {
                    counter.inc();
                }
            },
            || self.run_report(query),
        )
        .await?;
        Ok(records)
    }
}
