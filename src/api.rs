pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod popular;
pub(crate) mod sync;
pub(crate) mod validation;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

use crate::app::AppState;

/// OPTIONS リクエストはルーティング前に `CorsLayer` がプリフライト応答を返す。
pub(crate) fn router(state: AppState) -> Router {
    let cors = cors_layer(state.config().cors_allowed_origin());

    Router::new()
        .route(
            "/api/popular-articles/sync",
            post(sync::trigger).get(sync::trigger),
        )
        .route("/api/popular-articles", get(popular::list))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{ success: false, error }` 形式のエラーボディ。
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    success: bool,
    error: String,
}

impl ErrorBody {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if allowed_origin == "*" {
        return cors.allow_origin(Any);
    }

    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            // 不正な値ではクロスオリジンを一切許可しない
            error!(origin = %allowed_origin, "invalid CORS origin; cross-origin requests disabled");
            cors
        }
    }
}
