use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::{
    ErrorBody,
    validation::{RequestError, parse_date_range, parse_limit},
};
use crate::{app::AppState, model::ArticleId, scheduler::SyncOutcome};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SyncParams {
    limit: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    success: bool,
    message: String,
    count: usize,
    article_ids: Vec<ArticleId>,
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Synced { ids } => Self {
                success: true,
                message: format!("synced {} popular articles", ids.len()),
                count: ids.len(),
                article_ids: ids,
            },
            SyncOutcome::NoData { reason } => Self {
                success: false,
                message: reason,
                count: 0,
                article_ids: Vec::new(),
            },
        }
    }
}

/// 同期ジョブを実行する。GET はスケジューラ互換のため POST と同じ処理を行う。
pub(crate) async fn trigger(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    params: Result<Query<SyncParams>, QueryRejection>,
) -> Response {
    state.telemetry().record_sync_trigger(method.as_str());

    if state
        .config()
        .sync_trigger_token()
        .is_some_and(|expected| !token_matches(bearer_token(&headers), expected))
    {
        return (StatusCode::UNAUTHORIZED, Json(ErrorBody::new("unauthorized"))).into_response();
    }

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
        Ok(limit) => limit,
        Err(error) => return error.into_response(),
    };
    let date_range = match parse_date_range(
        params.start_date.as_deref(),
        params.end_date.as_deref(),
        config.default_date_range(),
    ) {
        Ok(range) => range,
        Err(error) => return error.into_response(),
    };

    match state.sync_job().run_sync(limit, &date_range).await {
        Ok(outcome) => (StatusCode::OK, Json(SyncResponse::from(outcome))).into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new(format!("{error:#}"))),
        )
            .into_response(),
    }
}

/// 長さ以外の情報がタイミングに漏れないよう比較する。
fn token_matches(provided: Option<&str>, expected: &str) -> bool {
    provided.is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}
