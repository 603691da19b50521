/// サービスアカウントによる OAuth アクセストークン取得。
///
/// RS256 署名した JWT アサーションをトークンエンドポイントに送り、
/// 取得したトークンを期限の少し手前までキャッシュします。
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::util::redact::redact;

pub(crate) const ANALYTICS_READONLY_SCOPE: &str =
    "https://www.googleapis.com/auth/analytics.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// 期限切れ直前のトークンを使わないための余裕。
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// サービスアカウント資格情報からアクセストークンを払い出すプロバイダ。
pub(crate) struct ServiceAccountTokenProvider {
    client: Client,
    token_url: Url,
    client_email: String,
    scope: &'static str,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenProvider")
            .field("token_url", &self.token_url.as_str())
            .field("client_email", &redact(&self.client_email))
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenProvider {
    /// 秘密鍵のパースとHTTPクライアントの構築を一度だけ行う。
    ///
    /// # Errors
    /// 秘密鍵がRSA PEMとして読めない場合、またはURLが不正な場合はエラーを返します。
    pub(crate) fn new(
        token_url: &str,
        client_email: impl Into<String>,
        private_key_pem: &str,
        scope: &'static str,
        timeout: Duration,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OAuth token HTTP client")?;
        let token_url = Url::parse(token_url).context("invalid OAuth token URL")?;

        Ok(Self {
            client,
            token_url,
            client_email: client_email.into(),
            scope,
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    /// 有効なアクセストークンを返す。キャッシュが切れていれば再取得する。
    ///
    /// # Errors
    /// JWTの署名、トークンエンドポイントへのリクエスト、応答のパースに失敗した場合。
    pub(crate) async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - EXPIRY_MARGIN_SECS > now {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.exchange(now).await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn exchange(&self, now: i64) -> Result<CachedToken> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: self.scope,
            aud: self.token_url.as_str(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
                .context("failed to sign service account assertion")?;

        debug!(client_email = %redact(&self.client_email), "requesting OAuth access token");

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("OAuth token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("OAuth token endpoint returned error status {status}: {error_body}");
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("failed to deserialize OAuth token response")?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in,
        })
    }
}

#[cfg(test)]
pub(crate) const TEST_PRIVATE_KEY: &str =
    include_str!("../../tests/fixtures/test_service_account.pem");
