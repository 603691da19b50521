use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::{info, warn};

use crate::{
    api,
    clients::{AnalyticsClient, AnalyticsConfig, CmsClient, CmsConfig},
    config::Config,
    observability::Telemetry,
    ranking::{AnalyticsReader, PageViewSource, PopularArticlesResolver, RankingStore},
    scheduler::SyncJob,
    util::retry::RetryConfig,
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

/// プロセス全体で共有するクライアントとジョブの組み立て結果。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    cms_client: Arc<CmsClient>,
    sync_job: SyncJob,
    resolver: PopularArticlesResolver,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn config(&self) -> &Config {
        &self.registry.config
    }

    pub(crate) fn cms_client(&self) -> &CmsClient {
        &self.registry.cms_client
    }

    pub(crate) fn sync_job(&self) -> &SyncJob {
        &self.registry.sync_job
    }

    pub(crate) fn resolver(&self) -> &PopularArticlesResolver {
        &self.registry.resolver
    }
}

impl ComponentRegistry {
    /// 構成情報からクライアントを一度だけ構築し、共有レジストリを作る。
    /// トレーシングは呼び出し側で先に初期化しておく。
    ///
    /// # Errors
    /// メトリクス登録や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config, telemetry: Telemetry) -> Result<Self> {
        let config = Arc::new(config);
        let metrics = telemetry.metrics();
        let retry = RetryConfig::new(
            config.http_max_retries().max(1),
            config.http_backoff_base_ms(),
            config.http_backoff_cap_ms(),
        );

        let cms_client = Arc::new(
            CmsClient::new(CmsConfig {
                base_url: config.cms_base_url().to_string(),
                api_key: config.cms_api_key().to_string(),
                popular_endpoint: config.cms_popular_endpoint().to_string(),
                articles_endpoint: config.cms_articles_endpoint().to_string(),
                timeout: config.cms_timeout(),
                retry,
            })
            .context("failed to build CMS client")?
            .with_retry_counter(metrics.upstream_retries.clone()),
        );

        let page_views: Option<Arc<dyn PageViewSource>> = match config.analytics_credentials() {
            Some(credentials) => {
                let client = AnalyticsClient::new(
                    credentials,
                    AnalyticsConfig {
                        api_base_url: config.ga_api_base_url().to_string(),
                        token_url: config.ga_token_url().to_string(),
                        timeout: config.ga_timeout(),
                        retry,
                    },
                )
                .context("failed to build analytics client")?
                .with_retry_counter(metrics.upstream_retries.clone());
                info!(property_id = %credentials.property_id, "analytics client configured");
                Some(Arc::new(client))
            }
            None => {
                warn!("analytics credentials are not configured; sync will report no data");
                None
            }
        };

        let reader = AnalyticsReader::new(page_views, config.article_path_prefix())
            .with_overfetch_factor(config.analytics_overfetch_factor())
            .with_metrics(Arc::clone(&metrics));
        let store = RankingStore::new(cms_client.clone());
        let sync_job = SyncJob::new(reader, store.clone()).with_metrics(Arc::clone(&metrics));
        let resolver =
            PopularArticlesResolver::new(store, cms_client.clone()).with_metrics(metrics);

        Ok(Self {
            config,
            telemetry,
            cms_client,
            sync_job,
            resolver,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn sync_job(&self) -> &SyncJob {
        &self.sync_job
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::clients::google_auth::TEST_PRIVATE_KEY;
    use crate::config::{
        ENV_MUTEX,
        test_env::{reset_env, set_env},
    };

    fn config_for(cms: &MockServer, extra: &[(&str, &str)]) -> Config {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("CMS_BASE_URL", &format!("{}/api/v1/", cms.uri()));
        set_env("CMS_API_KEY", "test-key");
        set_env("HTTP_MAX_RETRIES", "1");
        for (name, value) in extra {
            set_env(name, value);
        }
        let config = Config::from_env().expect("config loads");
        reset_env();
        config
    }

    fn app(config: Config) -> Router {
        let telemetry = Telemetry::metrics_only().expect("telemetry");
        let registry = ComponentRegistry::build(config, telemetry).expect("registry");
        build_router(registry)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("valid json")
    }

    /// トークン交換と `runReport` を返す Analytics のモックを立てる。
    async fn analytics_server(paths: &[&str]) -> MockServer {
        let ga = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.token",
                "expires_in": 3600
            })))
            .mount(&ga)
            .await;
        let rows: Vec<Value> = paths
            .iter()
            .zip((1..=paths.len()).rev())
            .map(|(page, views)| {
                json!({
                    "dimensionValues": [{ "value": page }],
                    "metricValues": [{ "value": (views * 100).to_string() }]
                })
            })
            .collect();
        Mock::given(method("POST"))
            .and(path("/v1beta/properties/123456:runReport"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": rows,
                "rowCount": paths.len()
            })))
            .mount(&ga)
            .await;
        ga
    }

    fn config_with_analytics(cms: &MockServer, ga: &MockServer) -> Config {
        let api_base = format!("{}/", ga.uri());
        let token_url = format!("{}/token", ga.uri());
        config_for(
            cms,
            &[
                ("GA_PROPERTY_ID", "123456"),
                ("GA_CLIENT_EMAIL", "sync@project.iam.gserviceaccount.com"),
                ("GA_PRIVATE_KEY", TEST_PRIVATE_KEY),
                ("GA_API_BASE_URL", &api_base),
                ("GA_TOKEN_URL", &token_url),
            ],
        )
    }

    fn article(id: &str) -> Value {
        json!({ "id": id, "title": format!("title-{id}") })
    }

    #[tokio::test]
    async fn sync_without_analytics_reports_no_data_and_skips_write() {
        let cms = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&cms)
            .await;
        let app = app(config_for(&cms, &[]));

        let response = app
            .oneshot(
                Request::post("/api/popular-articles/sync")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["count"], json!(0));
        assert_eq!(body["articleIds"], json!([]));
    }

    #[tokio::test]
    async fn sync_writes_ranking_and_reports_ids() {
        let cms = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/popular-articles"))
            .and(body_json(json!({ "articles": ["a", "b"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "popular-articles" })))
            .expect(1)
            .mount(&cms)
            .await;
        let ga = analytics_server(&["/articles/a", "/articles/b/", "/about"]).await;
        let app = app(config_with_analytics(&cms, &ga));

        let response = app
            .oneshot(
                Request::get("/api/popular-articles/sync?limit=5")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "success": true,
                "message": "synced 2 popular articles",
                "count": 2,
                "articleIds": ["a", "b"]
            })
        );
    }

    #[tokio::test]
    async fn sync_reports_rejected_write_as_server_error() {
        let cms = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/popular-articles"))
            .respond_with(ResponseTemplate::new(403).set_body_string("{\"message\":\"denied\"}"))
            .mount(&cms)
            .await;
        let ga = analytics_server(&["/articles/a", "/articles/b"]).await;
        let app = app(config_with_analytics(&cms, &ga));

        let response = app
            .oneshot(
                Request::post("/api/popular-articles/sync?limit=5")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().expect("error string").contains("403"));
    }

    #[tokio::test]
    async fn malformed_query_strings_use_error_body() {
        let cms = MockServer::start().await;
        let app = app(config_for(&cms, &[]));

        for uri in [
            "/api/popular-articles/sync?limit=1&limit=2",
            "/api/popular-articles?limit=1&limit=2",
        ] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
                .await
                .expect("response");

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = json_body(response).await;
            assert_eq!(body["success"], json!(false), "{uri}");
            assert!(
                body["error"].as_str().expect("error string").contains("duplicate field"),
                "{uri}"
            );
        }
    }

    #[tokio::test]
    async fn sync_rejects_invalid_limit_before_upstream_calls() {
        let cms = MockServer::start().await;
        let app = app(config_for(&cms, &[]));

        let response = app
            .oneshot(
                Request::get("/api/popular-articles/sync?limit=abc")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn sync_rejects_invalid_dates() {
        let cms = MockServer::start().await;
        let app = app(config_for(&cms, &[]));

        let response = app
            .oneshot(
                Request::post("/api/popular-articles/sync?startDate=lastweek")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_requires_configured_bearer_token() {
        let cms = MockServer::start().await;
        let app = app(config_for(&cms, &[("SYNC_TRIGGER_TOKEN", "s3cret")]));

        let denied = app
            .clone()
            .oneshot(
                Request::post("/api/popular-articles/sync")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(denied).await,
            json!({ "success": false, "error": "unauthorized" })
        );

        let allowed = app
            .oneshot(
                Request::post("/api/popular-articles/sync")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn preflight_is_answered_with_cors_headers() {
        let cms = MockServer::start().await;
        let app = app(config_for(&cms, &[("CORS_ALLOWED_ORIGIN", "https://example.com")]));

        let response = app
            .oneshot(
                Request::options("/api/popular-articles/sync")
                    .header(header::ORIGIN, "https://example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
        let methods = headers
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(methods.contains("POST"));
        assert!(methods.contains("OPTIONS"));
    }

    #[tokio::test]
    async fn popular_list_resolves_ranking_and_pads_with_latest() {
        let cms = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/popular-articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "articles": [{ "id": "b" }, { "id": "a" }]
            })))
            .mount(&cms)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/articles"))
            .and(query_param("ids", "b,a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "contents": [article("a"), article("b")]
            })))
            .mount(&cms)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/articles"))
            .and(query_param("orders", "-publishedAt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "contents": [article("n1"), article("a"), article("n2")]
            })))
            .mount(&cms)
            .await;
        let app = app(config_for(&cms, &[]));

        let response = app
            .oneshot(
                Request::get("/api/popular-articles?limit=3")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let ids: Vec<&str> = body["articles"]
            .as_array()
            .expect("articles array")
            .iter()
            .map(|article| article["id"].as_str().expect("id"))
            .collect();
        assert_eq!(ids, vec!["b", "a", "n1"]);
        assert_eq!(body["popularCount"], json!(2));
        assert_eq!(body["fallbackCount"], json!(1));
    }

    #[tokio::test]
    async fn popular_list_degrades_to_empty_on_cms_failure() {
        let cms = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&cms)
            .await;
        let app = app(config_for(&cms, &[]));

        let response = app
            .oneshot(
                Request::get("/api/popular-articles")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["articles"], json!([]));
        assert_eq!(body["popularCount"], json!(0));
    }

    #[tokio::test]
    async fn readiness_reflects_cms_reachability() {
        let cms = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/popular-articles"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&cms)
            .await;
        let app = app(config_for(&cms, &[]));

        let response = app
            .oneshot(Request::get("/health/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["status"], json!("degraded"));
        assert!(body["detail"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_sync_counters() {
        let cms = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(body_json(json!({ "articles": [] })))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&cms)
            .await;
        let app = app(config_for(&cms, &[]));

        app.clone()
            .oneshot(
                Request::post("/api/popular-articles/sync")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains("popular_sync_runs_total 1"));
        assert!(text.contains("popular_sync_empty_total 1"));
    }
}
