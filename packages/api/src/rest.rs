//! # REST backend
//!
//! [`RestBackend`] implements [`Backend`] against the three HTTP services of the
//! hosted backend, using one shared [`reqwest::Client`]:
//!
//! | Service | Endpoint | Used by |
//! |---------|----------|---------|
//! | Auth | `POST /auth/v1/token?grant_type=password` | [`sign_in_with_password`](Backend::sign_in_with_password) |
//! | Auth | `POST /auth/v1/token?grant_type=refresh_token` | [`refresh_session`](Backend::refresh_session) |
//! | Auth | `GET /auth/v1/user` | [`get_user`](Backend::get_user) |
//! | Data | `GET/HEAD/POST/PATCH/DELETE /rest/v1/<relation>` | table operations |
//! | Storage | `POST /storage/v1/object/<bucket>/<path>` | [`upload`](Backend::upload) |
//!
//! Change feeds go over the websocket client in [`crate::realtime`].
//!
//! ## Bearer token
//!
//! The client holds no session of its own. Each request is authorised with
//! the access token its caller names, or the anon key when it names none.
//!
//! ## Expired tokens
//!
//! `GET /auth/v1/user` rejects expired access tokens, but bootstrap only needs
//! the account id. On a 401 the `sub` claim is read from the token payload
//! instead (no signature check; the id is never used to authorise anything).

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::{AuthSession, AuthTokens, AuthUser, Backend, Query, Row, Subscription};
use crate::config::BaasConfig;
use crate::realtime;
use crate::ApiError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    user: AuthUser,
}

/// HTTP client for the hosted backend.
pub struct RestBackend {
    http: reqwest::Client,
    config: BaasConfig,
    base: String,
}

impl RestBackend {
    pub fn new(config: BaasConfig) -> Result<Self, ApiError> {
        let base = config.base_url()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            config,
            base,
        })
    }

    pub fn config(&self) -> &BaasConfig {
        &self.config
    }

    fn bearer<'a>(&'a self, access_token: Option<&'a str>) -> &'a str {
        access_token.unwrap_or(&self.config.anon_key)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .header("apikey", &self.config.anon_key)
    }

    fn table_request(&self, method: Method, query: &Query) -> RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", query.table))
            .bearer_auth(self.bearer(query.access_token.as_deref()))
            .query(&query.to_params())
    }

    async fn token_grant(&self, grant: &str, body: Value) -> Result<AuthTokens, ApiError> {
        let response = self
            .request(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", grant)])
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;
        tracing::debug!(grant, user = %token.user.id, "token issued");
        Ok(AuthTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }
}

/// Map non-2xx responses to errors; 401/403 become [`ApiError::Unauthorized`].
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Read the `sub` claim of a JWT without verifying it.
pub fn jwt_subject(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("sub")?.as_str().map(str::to_string)
}

/// Total from a `Content-Range: 0-24/57` (or `*/57`) header.
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, ApiError> {
        let response = self
            .request(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        // The auth service answers bad credentials with 400.
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(ApiError::Unauthorized);
        }
        let token: TokenResponse = check(response).await?.json().await?;
        Ok(AuthSession {
            tokens: AuthTokens {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
            },
            user: token.user,
        })
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
            .map_err(|e| match e {
                ApiError::Status { status: 400, .. } => ApiError::Unauthorized,
                other => other,
            })
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, ApiError> {
        let response = self
            .request(Method::GET, "/auth/v1/user")
            .bearer_auth(access_token)
            .send()
            .await?;
        match check(response).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(ApiError::Unauthorized) => Ok(jwt_subject(access_token).map(|id| AuthUser {
                id,
                email: None,
            })),
            Err(e) => Err(e),
        }
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, ApiError> {
        let response = self.table_request(Method::GET, query).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn count(&self, query: &Query) -> Result<u64, ApiError> {
        let response = self
            .table_request(Method::HEAD, query)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = check(response).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| ApiError::Status {
                status: response.status().as_u16(),
                message: format!("missing count for {}", query.table),
            })
    }

    async fn insert(
        &self,
        table: &str,
        row: Row,
        access_token: Option<&str>,
    ) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, &format!("/rest/v1/{table}"))
            .bearer_auth(self.bearer(access_token))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<(), ApiError> {
        let response = self
            .table_request(Method::PATCH, query)
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, query: &Query) -> Result<(), ApiError> {
        let response = self.table_request(Method::DELETE, query).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        table: &str,
        access_token: Option<&str>,
    ) -> Result<Subscription, ApiError> {
        let url = self.config.realtime_url()?;
        let bearer = self.bearer(access_token).to_string();
        Ok(realtime::subscribe(url, table, bearer))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: Option<&str>,
    ) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, &format!("/storage/v1/object/{bucket}/{path}"))
            .bearer_auth(self.bearer(access_token))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_subject() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user-7","exp":1}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig");
        assert_eq!(jwt_subject(&token).as_deref(), Some("user-7"));
        assert_eq!(jwt_subject("not-a-jwt"), None);
    }

    #[test]
    fn test_content_range() {
        assert_eq!(parse_content_range("0-24/57"), Some(57));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }

    #[test]
    fn test_bearer_falls_back_to_anon_key() {
        let backend = RestBackend::new(BaasConfig::new("https://proj.example.co", "anon")).unwrap();
        assert_eq!(backend.bearer(None), "anon");
        assert_eq!(backend.bearer(Some("student-token")), "student-token");
    }

    #[test]
    fn test_public_url() {
        let backend = RestBackend::new(BaasConfig::new("https://proj.example.co/", "anon")).unwrap();
        assert_eq!(
            backend.public_url("avatars", "s-1/me.png"),
            "https://proj.example.co/storage/v1/object/public/avatars/s-1/me.png"
        );
    }
}
