//! LM connection settings.
//!
//! Settings are read from a YAML file (`base`, `client`, `clientSecret`,
//! `secure`, `insecureSkipTlsVerify`, `requestTimeoutSecs`) and then
//! overridden from the environment:
//!
//! - `LM_BASE`
//! - `LM_CLIENT`
//! - `LM_CLIENT_SECRET`
//! - `LM_SECURE`
//! - `LM_INSECURE_SKIP_TLS_VERIFY`
//! - `LM_REQUEST_TIMEOUT_SECS`

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default location of the LM configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/var/assembly-operator/config.yaml";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Connection settings for LM.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LmConfig {
    /// Base URL of LM, e.g. `https://lm.example.com:8290`.
    #[serde(default)]
    pub base: String,
    /// OAuth2 client id.
    #[serde(default)]
    pub client: String,
    /// OAuth2 client secret.
    #[serde(default)]
    pub client_secret: String,
    /// Whether LM requires OAuth2 bearer tokens.
    #[serde(default)]
    pub secure: bool,
    /// Accept invalid TLS certificates presented by LM.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl fmt::Debug for LmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmConfig")
            .field("base", &self.base)
            .field("client", &self.client)
            .field("client_secret", &"[REDACTED]")
            .field("secure", &self.secure)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl LmConfig {
    /// Creates an unsecured configuration for the given base URL.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            client: String::new(),
            client_secret: String::new(),
            secure: false,
            insecure_skip_tls_verify: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Enables OAuth2 client-credentials authentication.
    #[must_use]
    pub fn with_client_credentials(
        mut self,
        client: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client = client.into();
        self.client_secret = client_secret.into();
        self.secure = true;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document is malformed.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("invalid LM config: {e}")))
    }

    /// Loads the configuration file (if given and present), applies the
    /// `LM_*` environment overrides and validates the result.
    ///
    /// A missing file is tolerated when the environment supplies `LM_BASE`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or parsed,
    /// an override is malformed, or the final settings are invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::configuration(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_yaml_str(&raw)?
            }
            _ => Self::new(String::new()),
        };
        config.apply_overrides(env_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `LM_*` overrides resolved through `lookup`.
    ///
    /// `lookup` returns the trimmed, non-empty value for a variable name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a boolean or integer override does
    /// not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("LM_BASE") {
            self.base = base;
        }
        if let Some(client) = lookup("LM_CLIENT") {
            self.client = client;
        }
        if let Some(secret) = lookup("LM_CLIENT_SECRET") {
            self.client_secret = secret;
        }
        if let Some(raw) = lookup("LM_SECURE") {
            self.secure = parse_bool("LM_SECURE", &raw)?;
        }
        if let Some(raw) = lookup("LM_INSECURE_SKIP_TLS_VERIFY") {
            self.insecure_skip_tls_verify = parse_bool("LM_INSECURE_SKIP_TLS_VERIFY", &raw)?;
        }
        if let Some(raw) = lookup("LM_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = raw.parse::<u64>().map_err(|_| {
                Error::configuration("LM_REQUEST_TIMEOUT_SECS must be an unsigned integer")
            })?;
        }
        Ok(())
    }

    /// Checks that the settings can be used to build a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.base.trim().is_empty() {
            return Err(Error::configuration("LM base URL is required"));
        }
        if !(self.base.starts_with("http://") || self.base.starts_with("https://")) {
            return Err(Error::configuration(format!(
                "LM base URL must start with http:// or https://, got {}",
                self.base
            )));
        }
        if self.secure && (self.client.is_empty() || self.client_secret.is_empty()) {
            return Err(Error::configuration(
                "client and clientSecret are required when secure is enabled",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::configuration("request timeout must be non-zero"));
        }
        Ok(())
    }

    /// Joins `path` onto the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{key} must be a boolean (true/false/1/0)"
        ))),
    }
}
