//! OAuth2 client-credentials token acquisition and caching.
//!
//! A single token is cached together with the instant it was obtained. The
//! cache lock is held across a refresh so concurrent callers never request
//! more than one token at a time.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::LmConfig;
use crate::error::{Error, Result};

/// Margin before expiry inside which a token is considered about to expire.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(1);

/// Fixed wait before replacing a token that is about to expire.
pub const NEAR_EXPIRY_WAIT: Duration = Duration::from_secs(2);

const TOKEN_PATH: &str = "/oauth/token";

/// Freshness of a cached token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFreshness {
    /// No token has been obtained yet.
    Missing,
    /// The token has expired.
    Expired,
    /// The token expires within [`EXPIRY_MARGIN`].
    ExpiringSoon,
    /// The token can be reused.
    Valid,
}

/// Classifies a token obtained `age` ago that was valid for `expires_in`.
#[must_use]
pub fn classify(age: Duration, expires_in: Duration) -> TokenFreshness {
    if age >= expires_in {
        TokenFreshness::Expired
    } else if age + EXPIRY_MARGIN >= expires_in {
        TokenFreshness::ExpiringSoon
    } else {
        TokenFreshness::Valid
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_in: Duration,
    obtained_at: Instant,
}

impl CachedToken {
    fn freshness(&self) -> TokenFreshness {
        classify(self.obtained_at.elapsed(), self.expires_in)
    }
}

/// Obtains and caches LM access tokens.
pub struct TokenManager {
    token_url: String,
    client: String,
    client_secret: String,
    secure: bool,
    cache: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url)
            .field("client", &self.client)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a token manager for the given LM settings.
    #[must_use]
    pub fn new(config: &LmConfig) -> Self {
        Self {
            token_url: config.endpoint(TOKEN_PATH),
            client: config.client.clone(),
            client_secret: config.client_secret.clone(),
            secure: config.secure,
            cache: Mutex::new(None),
        }
    }

    /// Returns true when LM requires bearer tokens.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Returns a usable access token, or `None` when LM is not secured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if a new token is needed and the
    /// token endpoint cannot be reached or rejects the credentials.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<Option<String>> {
        if !self.secure {
            return Ok(None);
        }

        let mut cache = self.cache.lock().await;
        let freshness = cache
            .as_ref()
            .map_or(TokenFreshness::Missing, CachedToken::freshness);

        match freshness {
            TokenFreshness::Valid => {
                if let Some(cached) = cache.as_ref() {
                    return Ok(Some(cached.access_token.clone()));
                }
            }
            TokenFreshness::ExpiringSoon => {
                tracing::debug!(
                    wait_ms = NEAR_EXPIRY_WAIT.as_millis(),
                    "access token about to expire, waiting before refresh"
                );
                tokio::time::sleep(NEAR_EXPIRY_WAIT).await;
            }
            TokenFreshness::Missing | TokenFreshness::Expired => {}
        }

        let fresh = self.request_token(http).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(Some(token))
    }

    /// Drops the cached token so the next call requests a new one.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn request_token(&self, http: &reqwest::Client) -> Result<CachedToken> {
        tracing::debug!(url = %self.token_url, "requesting LM access token");

        let response = http
            .post(&self.token_url)
            .basic_auth(&self.client, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::authentication_with_source("token request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::authentication(format!(
                "token endpoint returned {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::authentication_with_source("malformed token response", e))?;

        if token.access_token.is_empty() {
            return Err(Error::authentication("token endpoint returned an empty token"));
        }

        Ok(CachedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
            obtained_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_follows_expiry_margin() {
        let expires = Duration::from_secs(60);
        assert_eq!(classify(Duration::from_secs(10), expires), TokenFreshness::Valid);
        assert_eq!(
            classify(Duration::from_millis(59_500), expires),
            TokenFreshness::ExpiringSoon
        );
        assert_eq!(classify(Duration::from_secs(59), expires), TokenFreshness::ExpiringSoon);
        assert_eq!(classify(Duration::from_secs(60), expires), TokenFreshness::Expired);
        assert_eq!(classify(Duration::from_secs(61), expires), TokenFreshness::Expired);
    }

    #[test]
    fn zero_lifetime_tokens_are_expired() {
        assert_eq!(classify(Duration::ZERO, Duration::ZERO), TokenFreshness::Expired);
    }

    #[tokio::test]
    async fn unsecured_manager_never_requests_tokens() {
        let manager = TokenManager::new(&LmConfig::new("http://127.0.0.1:1"));
        let http = reqwest::Client::new();
        let token = manager.access_token(&http).await.expect("no token needed");
        assert!(token.is_none());
        assert!(!manager.is_secure());
    }

    #[test]
    fn debug_omits_secret() {
        let config = LmConfig::new("https://lm").with_client_credentials("c", "hunter2");
        let rendered = format!("{:?}", TokenManager::new(&config));
        assert!(!rendered.contains("hunter2"));
    }
}
