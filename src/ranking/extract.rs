/// ページパスから記事IDを取り出し、閲覧数順の重複なしリストを作る。
use std::collections::HashSet;

use crate::model::ArticleId;

use super::reader::PageViewRecord;

/// `prefix` 直後のパスセグメントを記事IDとして返す。
///
/// `prefix` に一致しないパスや、IDが空のパスは `None`。
/// 末尾スラッシュ・クエリ・フラグメントはIDに含めない。
#[must_use]
pub fn extract_article_id(path: &str, prefix: &str) -> Option<ArticleId> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let id = rest[..end].trim();

    if id.is_empty() {
        None
    } else {
        Some(ArticleId::new(id))
    }
}

/// 閲覧数降順に並んだレコードから、最初に現れた順で重複を除いたIDを最大 `limit` 件返す。
///
/// 並び替えは行わない。入力の順序がそのままランキングになる。
#[must_use]
pub fn rank_article_ids<'a, I>(records: I, prefix: &str, limit: usize) -> Vec<ArticleId>
where
    I: IntoIterator<Item = &'a PageViewRecord>,
{
    let mut seen = HashSet::new();
    let mut ranked = Vec::with_capacity(limit);

    for record in records {
        if ranked.len() >= limit {
            break;
        }
        let Some(id) = extract_article_id(&record.path, prefix) else {
            continue;
        };
        if seen.insert(id.clone()) {
            ranked.push(id);
        }
    }

    ranked
}
