use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::validation::{RequestError, parse_limit};
use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PopularParams {
    limit: Option<String>,
}

/// 人気記事を新着記事で補完したリストを返す。上流の失敗は空リストとして扱い、常に 200。
pub(crate) async fn list(
    State(state): State<AppState>,
    params: Result<Query<PopularParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return RequestError::from(rejection).into_response(),
    };
    let config = state.config();
    let limit = match parse_limit(
        params.limit.as_deref(),
        config.popular_default_limit(),
        config.popular_max_limit(),
    ) {
        Ok(limit) => usize::try_from(limit).unwrap_or(0),
        Err(error) => return error.into_response(),
    };

    let feed = state.resolver().popular_with_fallback(limit).await;
    (StatusCode::OK, Json(feed)).into_response()
}
