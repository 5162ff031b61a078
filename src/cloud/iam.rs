//! Yandex Cloud IAM tokens from a service account authorized key
//!
//! The key signs a short-lived PS256 JWT which is exchanged for an IAM token.
//! IAM tokens live for hours, so the token (never the address data) is cached
//! until shortly before it expires.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Default IAM API endpoint
pub const DEFAULT_IAM_ENDPOINT: &str = "https://iam.api.cloud.yandex.net";

/// Audience the IAM token exchange expects in the JWT
const TOKEN_AUDIENCE: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";

/// Lifetime of the signed JWT
const JWT_LIFETIME: Duration = Duration::minutes(60);

/// Refresh the IAM token this long before it expires
const REFRESH_MARGIN: Duration = Duration::minutes(5);

/// Source of bearer tokens for cloud API calls
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid bearer token
    async fn token(&self) -> Result<String>;
}

/// Service account authorized key, as downloaded from the cloud console
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Key id, sent as the JWT `kid`
    pub id: String,
    /// Service account the key belongs to, sent as the JWT `iss`
    pub service_account_id: String,
    /// PEM private key (may be preceded by a comment line)
    pub private_key: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("id", &self.id)
            .field("service_account_id", &self.service_account_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse an authorized key JSON document
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::config(format!("invalid service account key: {}", e)))
    }

    /// The PEM block of the private key without any leading comment
    fn private_key_pem(&self) -> &str {
        self.private_key
            .find("-----BEGIN")
            .map(|start| &self.private_key[start..])
            .unwrap_or(&self.private_key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    aud: String,
    iss: String,
    iat: i64,
    exp: i64,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    jwt: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    iam_token: String,
    expires_at: DateTime<Utc>,
}

struct CachedToken {
    token: String,
    refresh_at: DateTime<Utc>,
}

/// IAM token provider backed by a service account key
pub struct IamTokenSource {
    key_id: String,
    service_account_id: String,
    signing_key: EncodingKey,
    endpoint: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl IamTokenSource {
    /// Create a token source for the given key and IAM endpoint
    pub fn new(key: &ServiceAccountKey, endpoint: impl Into<String>) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key_pem().as_bytes())
            .map_err(|e| Error::config(format!("invalid service account private key: {}", e)))?;

        Ok(Self {
            key_id: key.id.clone(),
            service_account_id: key.service_account_id.clone(),
            signing_key,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        })
    }

    /// Sign the JWT presented to the token exchange
    fn signed_jwt(&self, now: DateTime<Utc>) -> Result<String> {
        let mut header = Header::new(Algorithm::PS256);
        header.kid = Some(self.key_id.clone());

        let claims = JwtClaims {
            aud: TOKEN_AUDIENCE.to_string(),
            iss: self.service_account_id.clone(),
            iat: now.timestamp(),
            exp: (now + JWT_LIFETIME).timestamp(),
        };

        encode(&header, &claims, &self.signing_key)
            .map_err(|e| Error::transport(format!("failed to sign IAM JWT: {}", e)))
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let jwt = self.signed_jwt(now)?;
        let response = self
            .http
            .post(format!("{}/iam/v1/tokens", self.endpoint))
            .json(&TokenRequest { jwt: &jwt })
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::transport(format!("IAM token exchange failed: {}", e)))?
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::transport(format!("invalid IAM token response: {}", e)))?;

        debug!(expires_at = %response.expires_at, "Obtained IAM token");
        Ok(CachedToken {
            token: response.iam_token,
            refresh_at: response.expires_at - REFRESH_MARGIN,
        })
    }
}

#[async_trait]
impl TokenProvider for IamTokenSource {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > now) {
            return Ok(token.token.clone());
        }

        let fresh = self.exchange(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
