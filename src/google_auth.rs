//! Google service account authentication.
//!
//! Mints OAuth2 access tokens from a service account key using the JWT
//! bearer grant, and caches them until shortly before expiry. Used by the
//! Cloud Vision backend when no API key is configured.

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const CLOUD_VISION_SCOPE: &str = "https://www.googleapis.com/auth/cloud-vision";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested for each assertion; Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: u64 = 3600;
/// Refresh this many seconds before the token actually expires.
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// Claim set of the signed assertion sent to the token endpoint.
#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: u64,
}

impl CachedToken {
    fn valid_at(&self, now: u64) -> bool {
        now < self.expires_at.saturating_sub(EXPIRY_MARGIN_SECS)
    }
}

/// Service account credentials with a shared token cache.
///
/// The cache lock is held across a refresh, so concurrent callers that find
/// it cold wait for one exchange instead of each minting their own token.
#[derive(Clone)]
pub struct ServiceAccountAuth {
    client_email: String,
    token_uri: String,
    scope: String,
    signing_key: EncodingKey,
    cache: Arc<Mutex<Option<CachedToken>>>,
}

impl ServiceAccountAuth {
    /// Parse a service account key file's JSON contents.
    ///
    /// The RSA key is decoded here, so a bad credential fails at start-up.
    pub fn from_json(key_json: &str, scope: &str) -> Result<Self> {
        let key: ServiceAccountKey =
            serde_json::from_str(key_json).context("Failed to parse service account key")?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Invalid RSA private key in service account JSON")?;

        Ok(Self {
            client_email: key.client_email,
            token_uri: key
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            scope: scope.to_string(),
            signing_key,
            cache: Arc::new(Mutex::new(None)),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Current access token, exchanging a fresh assertion when the cached
    /// one is missing or about to expire.
    pub async fn access_token(&self, client: &reqwest::Client) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let now = now_secs();
        if let Some(cached) = cache.as_ref().filter(|c| c.valid_at(now)) {
            return Ok(cached.access_token.clone());
        }

        let fresh = self.exchange(client, now).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    fn sign_assertion(&self, now: u64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("Failed to sign service account assertion")
    }

    async fn exchange(&self, client: &reqwest::Client, now: u64) -> Result<CachedToken> {
        let assertion = self.sign_assertion(now)?;

        let resp = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .with_context(|| format!("Token request to {} failed", self.token_uri))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token endpoint rejected assertion ({}): {}", status, body);
        }

        let token: TokenResponse = resp.json().await.context("Failed to parse token response")?;
        debug!(
            "Access token for {} valid for {}s",
            self.client_email, token.expires_in
        );

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in,
        })
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
