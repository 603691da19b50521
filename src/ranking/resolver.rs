use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    model::{Article, ArticleId},
    observability::metrics::Metrics,
};

use super::store::RankingStore;

/// 記事IDから記事本体を引くための取得元。
#[async_trait]
pub trait ArticleLookup: Send + Sync {
    /// 指定IDの記事。存在しないIDは結果に含まれず、順序は保証しない。
    async fn articles_by_ids(&self, ids: &[ArticleId]) -> Result<Vec<Article>>;

    /// 公開日の新しい順に最大 `limit` 件。
    async fn latest_articles(&self, limit: usize) -> Result<Vec<Article>>;
}

/// 表示用に解決・補完した人気記事リスト。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularFeed {
    pub articles: Vec<Article>,
    pub popular_count: usize,
    pub fallback_count: usize,
}

/// ランキングレコードを記事に解決する。失敗は常に空リストに落とす。
#[derive(Clone)]
pub struct PopularArticlesResolver {
    store: RankingStore,
    lookup: Arc<dyn ArticleLookup>,
    metrics: Option<Arc<Metrics>>,
}

impl PopularArticlesResolver {
    #[must_use]
    pub fn new(store: RankingStore, lookup: Arc<dyn ArticleLookup>) -> Self {
        Self {
            store,
            lookup,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// ランキング順を保ったまま記事を解決し、最大 `limit` 件返す。
    ///
    /// 解決できなかったIDは黙って除外する。
    pub async fn get_popular_articles(&self, limit: usize) -> Vec<Article> {
        if limit == 0 {
            return Vec::new();
        }

        let ids = self.store.read_popular_article_ids().await;
        if ids.is_empty() {
            return Vec::new();
        }

        let resolved = match self.lookup.articles_by_ids(&ids).await {
            Ok(articles) => articles,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "failed to resolve popular articles");
                if let Some(metrics) = &self.metrics {
                    metrics.resolve_failures.inc();
                }
                return Vec::new();
            }
        };

        let mut by_id: HashMap<ArticleId, Article> = resolved
            .into_iter()
            .map(|article| (article.id.clone(), article))
            .collect();

        let ordered: Vec<Article> = ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .take(limit)
            .collect();

        if ordered.len() < ids.len().min(limit) {
            debug!(
                ranked = ids.len(),
                resolved = ordered.len(),
                "some popular article ids could not be resolved"
            );
        }

        ordered
    }

    /// 人気記事と新着記事を並行取得し、新着で補完したリストを返す。
    ///
    /// 重複を除いても `limit` 件に届くよう、新着は `2 × limit` 件取得する。
    pub async fn popular_with_fallback(&self, limit: usize) -> PopularFeed {
        let (popular, latest) = tokio::join!(
            self.get_popular_articles(limit),
            self.lookup.latest_articles(limit.saturating_mul(2)),
        );

        let latest = latest.unwrap_or_else(|error| {
            warn!(error = %format!("{error:#}"), "failed to fetch latest articles for fallback");
            Vec::new()
        });

        let articles = with_fallback(&popular, &latest, limit);
        let popular_count = popular.len().min(limit);
        let fallback_count = articles.len() - popular_count;

        if let Some(metrics) = &self.metrics {
            #[allow(clippy::cast_precision_loss)]
            let padded = fallback_count as f64;
            metrics.fallback_padded.inc_by(padded);
        }

        PopularFeed {
            articles,
            popular_count,
            fallback_count,
        }
    }
}

/// 人気記事の後ろに、人気記事に含まれない新着記事を順に足して `limit` 件に切り詰める。
///
/// `all_sorted` は呼び出し側で新しい順に並べておくこと。ここでは並べ替えない。
#[must_use]
pub fn with_fallback(popular: &[Article], all_sorted: &[Article], limit: usize) -> Vec<Article> {
    let mut result: Vec<Article> = popular.iter().take(limit).cloned().collect();
    if result.len() >= limit {
        return result;
    }

    let mut seen: HashSet<&ArticleId> = popular.iter().map(|article| &article.id).collect();
    for article in all_sorted {
        if result.len() >= limit {
            break;
        }
        if seen.insert(&article.id) {
            result.push(article.clone());
        }
    }

    result
}
