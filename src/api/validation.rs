/// クエリパラメータの検証。上流へ問い合わせる前に 400 で弾く。
use std::str::FromStr;

use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use super::ErrorBody;
use crate::model::{DateRange, DateSpec};

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RequestError {
    #[error("limit must be an integer, got {0:?}")]
    InvalidLimit(String),
    #[error("limit must not exceed {max}")]
    LimitTooLarge { max: usize },
    #[error("{field} must be today, yesterday, NdaysAgo or YYYY-MM-DD, got {value:?}")]
    InvalidDate { field: &'static str, value: String },
    #[error("invalid query string: {0}")]
    InvalidQuery(String),
}

impl From<QueryRejection> for RequestError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidQuery(rejection.body_text())
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// `limit` を検証する。0以下はそのまま通し、呼び出し側で「データなし」として扱う。
pub(crate) fn parse_limit(raw: Option<&str>, default: usize, max: usize) -> Result<i64, RequestError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(i64::try_from(default).unwrap_or(i64::MAX));
    };

    let limit = i64::from_str(raw).map_err(|_| RequestError::InvalidLimit(raw.to_string()))?;
    if usize::try_from(limit).is_ok_and(|limit| limit > max) {
        return Err(RequestError::LimitTooLarge { max });
    }
    Ok(limit)
}

pub(crate) fn parse_date_range(
    start: Option<&str>,
    end: Option<&str>,
    defaults: DateRange,
) -> Result<DateRange, RequestError> {
    Ok(DateRange::new(
        parse_date("startDate", start, defaults.start)?,
        parse_date("endDate", end, defaults.end)?,
    ))
}

fn parse_date(
    field: &'static str,
    raw: Option<&str>,
    default: DateSpec,
) -> Result<DateSpec, RequestError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| RequestError::InvalidDate {
            field,
            value: value.to_string(),
        }),
    }
}
