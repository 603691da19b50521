/// CMS記事と集計期間のドメインモデル。
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CMS上の記事ID。一意性以外の構造は仮定しない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ArticleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eyecatch {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// CMSから解決された記事エンティティ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub eyecatch: Option<Eyecatch>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// 集計期間の片端。Analytics の日付文法 (`today` / `yesterday` / `NdaysAgo` / `YYYY-MM-DD`) に従う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Today,
    Yesterday,
    DaysAgo(u32),
    Absolute(NaiveDate),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid date `{0}`: expected today, yesterday, NdaysAgo or YYYY-MM-DD")]
pub struct DateSpecError(pub String);

impl FromStr for DateSpec {
    type Err = DateSpecError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        match value {
            "today" => return Ok(Self::Today),
            "yesterday" => return Ok(Self::Yesterday),
            _ => {}
        }

        if let Some(days) = value.strip_suffix("daysAgo") {
            if !days.is_empty() && days.bytes().all(|b| b.is_ascii_digit()) {
                return days
                    .parse::<u32>()
                    .map(Self::DaysAgo)
                    .map_err(|_| DateSpecError(raw.to_string()));
            }
            return Err(DateSpecError(raw.to_string()));
        }

        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Self::Absolute)
            .map_err(|_| DateSpecError(raw.to_string()))
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Today => f.write_str("today"),
            Self::Yesterday => f.write_str("yesterday"),
            Self::DaysAgo(days) => write!(f, "{days}daysAgo"),
            Self::Absolute(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// 両端を含む集計期間。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateSpec,
    pub end: DateSpec,
}

impl DateRange {
    #[must_use]
    pub const fn new(start: DateSpec, end: DateSpec) -> Self {
        Self { start, end }
    }

    /// 直近7日間 (`8daysAgo`〜`1daysAgo`)。
    #[must_use]
    pub const fn last_week() -> Self {
        Self::new(DateSpec::DaysAgo(8), DateSpec::DaysAgo(1))
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::last_week()
    }
}
