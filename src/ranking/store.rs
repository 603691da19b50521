use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::model::ArticleId;

/// ランキングレコードの保存先。レコードは常に1件だけ存在する。
#[async_trait]
pub trait RankingBackend: Send + Sync {
    /// 現在のランキング順の記事ID。
    async fn load_ids(&self) -> Result<Vec<ArticleId>>;

    /// ランキング全体を `ids` で置き換える。
    async fn replace_ids(&self, ids: &[ArticleId]) -> Result<()>;
}

/// ランキングレコードの読み書き。
///
/// 書き込みは唯一の更新経路なので失敗をそのまま返す。
/// 読み出しは表示側に補完手段があるため、失敗しても空リストに落とす。
#[derive(Clone)]
pub struct RankingStore {
    backend: Arc<dyn RankingBackend>,
}

impl RankingStore {
    #[must_use]
    pub fn new(backend: Arc<dyn RankingBackend>) -> Self {
        Self { backend }
    }

    /// # Errors
    /// 保存先が更新を受け付けなかった場合。エラーには上流のステータスとメッセージが含まれる。
    pub async fn write_popular_articles(&self, ids: &[ArticleId]) -> Result<()> {
        self.backend
            .replace_ids(ids)
            .await
            .context("failed to update popular articles record")?;
        info!(count = ids.len(), "popular articles record replaced");
        Ok(())
    }

    pub async fn read_popular_article_ids(&self) -> Vec<ArticleId> {
        match self.backend.load_ids().await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "failed to read popular articles record");
                Vec::new()
            }
        }
    }
}
