/// ヘッドレスCMSクライアント。
///
/// ランキング用の単一レコードの読み書きと、記事の一括取得・新着取得を行います。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use prometheus::Counter;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    model::{Article, ArticleId},
    ranking::{resolver::ArticleLookup, store::RankingBackend},
    util::retry::{RetryConfig, is_retryable_error, is_retryable_status, retry_with_backoff},
};

pub(crate) const API_KEY_HEADER: &str = "X-MICROCMS-API-KEY";
/// 一覧APIが1リクエストで返せる最大件数。
const MAX_PAGE_SIZE: usize = 100;
const ARTICLE_FIELDS: &str = "id,title,publishedAt,eyecatch,category,tags";

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("CMS request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("CMS returned error status {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("failed to deserialize CMS response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl CmsError {
    /// 失敗時のHTTPステータス。通信エラーの場合は `None`。
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(error) | Self::Decode(error) => error.status(),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(error) => is_retryable_error(error),
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Decode(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArticleRef {
    id: ArticleId,
}

#[derive(Debug, Deserialize)]
struct PopularRecord {
    #[serde(default)]
    articles: Vec<ArticleRef>,
}

#[derive(Debug, Serialize)]
struct PopularRecordPatch<'a> {
    articles: &'a [ArticleId],
}

#[derive(Debug, Deserialize)]
struct ArticleList {
    #[serde(default)]
    contents: Vec<Article>,
}

/// CMSクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct CmsConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) popular_endpoint: String,
    pub(crate) articles_endpoint: String,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryConfig,
}

/// CMSとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub(crate) struct CmsClient {
    client: Client,
    popular_url: Url,
    articles_url: Url,
    api_key: String,
    retry: RetryConfig,
    retries_total: Option<Counter>,
}

impl CmsClient {
    /// 新しいCMSクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: CmsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build CMS HTTP client")?;

        let base_url = Url::parse(&ensure_trailing_slash(&config.base_url))
            .context("invalid CMS base URL")?;
        let popular_url = base_url
            .join(&config.popular_endpoint)
            .context("invalid CMS popular endpoint")?;
        let articles_url = base_url
            .join(&config.articles_endpoint)
            .context("invalid CMS articles endpoint")?;

        Ok(Self {
            client,
            popular_url,
            articles_url,
            api_key: config.api_key,
            retry: config.retry,
            retries_total: None,
        })
    }

    #[must_use]
    pub(crate) fn with_retry_counter(mut self, counter: Counter) -> Self {
        self.retries_total = Some(counter);
        self
    }

    /// ランキングレコードの `articles` からIDを順序通りに取り出す。
    pub(crate) async fn fetch_popular_ids(&self) -> Result<Vec<ArticleId>, CmsError> {
        let record: PopularRecord = self
            .with_retry("cms.popular.get", || {
                self.get_json(
                    self.popular_url.clone(),
                    vec![("fields", "articles.id".to_string())],
                )
            })
            .await?;

        Ok(record.articles.into_iter().map(|entry| entry.id).collect())
    }

    /// ランキングレコードの `articles` を丸ごと置き換える。
    pub(crate) async fn replace_popular_ids(&self, ids: &[ArticleId]) -> Result<(), CmsError> {
        self.with_retry("cms.popular.patch", || self.patch_popular(ids))
            .await
    }

    /// 指定IDの記事を一括取得する。返却順はCMS依存。
    pub(crate) async fn fetch_articles_by_ids(
        &self,
        ids: &[ArticleId],
    ) -> Result<Vec<Article>, CmsError> {
        let mut articles = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_PAGE_SIZE) {
            let joined = chunk
                .iter()
                .map(ArticleId::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let limit = chunk.len().to_string();
            let page: ArticleList = self
                .with_retry("cms.articles.by_ids", || {
                    self.get_json(
                        self.articles_url.clone(),
                        vec![
                            ("ids", joined.clone()),
                            ("limit", limit.clone()),
                            ("fields", ARTICLE_FIELDS.to_string()),
                        ],
                    )
                })
                .await?;
            articles.extend(page.contents);
        }

        debug!(requested = ids.len(), resolved = articles.len(), "resolved articles by id");
        Ok(articles)
    }

    /// 公開日の新しい順に記事を取得する。
    pub(crate) async fn fetch_latest_articles(&self, limit: usize) -> Result<Vec<Article>, CmsError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = limit.min(MAX_PAGE_SIZE).to_string();
        let page: ArticleList = self
            .with_retry("cms.articles.latest", || {
                self.get_json(
                    self.articles_url.clone(),
                    vec![
                        ("orders", "-publishedAt".to_string()),
                        ("limit", limit.clone()),
                        ("fields", ARTICLE_FIELDS.to_string()),
                    ],
                )
            })
            .await?;

        Ok(page.contents)
    }

    /// ランキングレコードが読めるかを確認する。
    ///
    /// # Errors
    /// リクエストが失敗した場合、またはCMSがエラー状態を返した場合はエラーを返します。
    pub(crate) async fn ping(&self) -> Result<(), CmsError> {
        let _: PopularRecord = self
            .get_json(
                self.popular_url.clone(),
                vec![("fields", "articles.id".to_string())],
            )
            .await?;
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, CmsError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CmsError>>,
    {
        retry_with_backoff(
            self.retry,
            operation,
            CmsError::is_retryable,
            || {
                if let Some(counter) = &self.retries_total {
                    counter.inc();
                }
            },
            call,
        )
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: Vec<(&'static str, String)>,
    ) -> Result<T, CmsError> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(CmsError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CmsError::Status { status, message });
        }

        response.json::<T>().await.map_err(CmsError::Decode)
    }

    async fn patch_popular(&self, ids: &[ArticleId]) -> Result<(), CmsError> {
        let response = self
            .client
            .patch(self.popular_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&PopularRecordPatch { articles: ids })
            .send()
            .await
            .map_err(CmsError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CmsError::Status { status, message });
        }

        Ok(())
    }
}

fn ensure_trailing_slash(raw: &str) -> String {
    if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    }
}

#[async_trait]
impl RankingBackend for CmsClient {
    async fn load_ids(&self) -> Result<Vec<ArticleId>> {
        Ok(self.fetch_popular_ids().await?)
    }

    async fn replace_ids(&self, ids: &[ArticleId]) -> Result<()> {
        Ok(self.replace_popular_ids(ids).await?)
    }
}

#[async_trait]
impl ArticleLookup for CmsClient {
    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>> {
        Ok(self.fetch_articles_by_ids(ids).await?)
    }

    async fn latest_articles(&self, limit: usize) -> Result<Vec<Article>> {
        Ok(self.fetch_latest_articles(limit).await?)
    }
}
