// src/api/auth.rs
use crate::config::AuthConfig;
use crate::connection::Identity;
use axum::{
    body::{to_bytes, Body},
    extract::{OriginalUri, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

/// 簽名請求允許讀取的最大 body
const MAX_SIGNED_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing {0} header")]
    MissingHeader(String),

    #[error("Invalid {0}")]
    Invalid(String),

    #[error("Request expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing connect token")]
    MissingToken,

    #[error("Malformed connect token")]
    MalformedToken,

    #[error("Connect token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": "unauthorized",
            "message": self.to_string(),
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// 連線 token 驗證器
///
/// token 格式為 `userId.organizationId.expiresAt.signature`，
/// 簽章是 `sha256(userId:organizationId:expiresAt:secret)` 的十六進位字串。
/// 發行 token 由外部負責，網關只做驗證。
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    secret: String,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn signature(&self, user_id: &str, organization_id: &str, expires_at: i64) -> String {
        let material = format!("{}:{}:{}:{}", user_id, organization_id, expires_at, self.secret);
        sha256_hex(&[material.as_bytes()])
    }

    /// 產生 token，供測試與工具使用
    pub fn issue(&self, identity: &Identity, expires_at: i64) -> String {
        format!(
            "{}.{}.{}.{}",
            identity.user_id,
            identity.organization_id,
            expires_at,
            self.signature(&identity.user_id, &identity.organization_id, expires_at)
        )
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let parts: Vec<&str> = token.split('.').collect();
        let [user_id, organization_id, expires_at, signature] = parts.as_slice() else {
            return Err(AuthError::MalformedToken);
        };
        if user_id.is_empty() || organization_id.is_empty() {
            return Err(AuthError::MalformedToken);
        }
        let expires_at = expires_at
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedToken)?;

        if *signature != self.signature(user_id, organization_id, expires_at) {
            return Err(AuthError::InvalidSignature);
        }
        if expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        Ok(Identity::new(*user_id, *organization_id))
    }
}

#[derive(Debug, Clone)]
pub struct ApiAuth {
    pub api_key: String,
    pub secret_key: String,
    pub max_clock_skew_secs: i64,
}

impl ApiAuth {
    pub fn new(api_key: String, secret_key: String, max_clock_skew_secs: i64) -> Self {
        Self {
            api_key,
            secret_key,
            max_clock_skew_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.max_clock_skew_secs,
        )
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str, what: &str) -> Result<&'a str, AuthError> {
        headers
            .get(name)
            .ok_or_else(|| AuthError::MissingHeader(name.to_string()))?
            .to_str()
            .map_err(|_| AuthError::Invalid(what.to_string()))
    }

    pub fn verify_request(
        &self,
        method: &str,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), AuthError> {
        self.verify_request_at(method, path, headers, body, Utc::now().timestamp())
    }

    pub fn verify_request_at(
        &self,
        method: &str,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
        now: i64,
    ) -> Result<(), AuthError> {
        let api_key = Self::header(headers, "X-API-Key", "API Key")?;
        if api_key != self.api_key {
            return Err(AuthError::Invalid("API Key".to_string()));
        }

        let timestamp = Self::header(headers, "X-Timestamp", "timestamp")?
            .parse::<i64>()
            .map_err(|_| AuthError::Invalid("timestamp format".to_string()))?;
        if now.abs_diff(timestamp) > self.max_clock_skew_secs.unsigned_abs() {
            return Err(AuthError::Expired);
        }

        let signature = Self::header(headers, "X-Signature", "signature")?;
        if signature != self.sign(method, path, timestamp, body) {
            return Err(AuthError::InvalidSignature);
        }

        Ok(())
    }

    /// `hex(sha256(method ++ path ++ timestamp ++ secret ++ body))`
    pub fn sign(&self, method: &str, path: &str, timestamp: i64, body: &[u8]) -> String {
        let prefix = format!("{}{}{}{}", method, path, timestamp, self.secret_key);
        sha256_hex(&[prefix.as_bytes(), body])
    }
}

pub async fn auth_middleware(
    State(auth): State<ApiAuth>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let method = request.method().clone();
    // nest 之後 uri 已去掉前綴，簽章以完整路徑計算
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST.into_response())?;

    auth.verify_request(method.as_str(), &path, &headers, &body_bytes)
        .map_err(|e| {
            warn!(path = %path, error = %e, "簽名請求驗證失敗");
            e.into_response()
        })?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}
