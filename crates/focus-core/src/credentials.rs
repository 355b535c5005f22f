//! Credentials for the generation and storage APIs.
//!
//! Which credential is in use is decided once, from [`SummaryConfig`], when
//! the service starts. Service-account key files are read on every use so
//! that no token state is shared between requests.

use crate::config::SummaryConfig;
use crate::error::{FocusError, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The credential used to call the generation service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Path to a service-account JSON key; exchanged for a bearer token.
    ServiceAccount { key_path: PathBuf },
    /// API key sent with each request.
    ApiKey(String),
}

impl Credential {
    /// Pick the configured credential. A service account wins over an API key.
    pub fn from_config(config: &SummaryConfig) -> Option<Self> {
        if let Some(path) = &config.credentials_path {
            return Some(Self::ServiceAccount {
                key_path: path.clone(),
            });
        }
        config.api_key.clone().map(Self::ApiKey)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceAccount { .. } => "service_account",
            Self::ApiKey(_) => "api_key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount { key_path } => f
                .debug_struct("ServiceAccount")
                .field("key_path", key_path)
                .finish(),
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

/// The fields of a service-account key file that the token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ServiceAccountKey {
    /// Read and parse a key file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            FocusError::Credentials(format!("failed reading {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            FocusError::Credentials(format!("invalid key file {}: {}", path.display(), e))
        })
    }

    /// Build a signed RS256 assertion for `scope`, issued at `now` (Unix seconds).
    pub fn assertion(&self, scope: &str, now: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }

    /// Exchange a fresh assertion for an OAuth access token.
    pub async fn access_token(&self, client: &reqwest::Client, scope: &str) -> Result<String> {
        let assertion = self.assertion(scope, chrono::Utc::now().timestamp())?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        let resp = client
            .post(&self.token_uri)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(FocusError::Credentials(format!(
                "token endpoint returned {}: {}",
                status, text
            )));
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token)
    }
}
