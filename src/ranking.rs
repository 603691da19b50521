//! 人気記事ランキングのパイプライン。
//!
//! Analytics のページビュー → ランキングIDリスト → CMS上のランキングレコード →
//! 表示時の記事解決と新着記事による補完、の順に流れる。

pub mod extract;
pub mod reader;
pub mod resolver;
pub mod store;

pub use extract::{extract_article_id, rank_article_ids};
pub use reader::{AnalyticsReader, PageViewQuery, PageViewRecord, PageViewSource};
pub use resolver::{ArticleLookup, PopularArticlesResolver, PopularFeed, with_fallback};
pub use store::{RankingBackend, RankingStore};
