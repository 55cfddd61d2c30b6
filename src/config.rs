use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{Result, SourceError};

pub const DEFAULT_BASE_URL: &str = "https://api.primetric.com/beta";
pub const DEFAULT_TOKEN_URL: &str = "https://api.primetric.com/auth/token/";

/// Client credentials for the Primetric token exchange
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    /// Build credentials, rejecting empty or whitespace-only values
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();

        if client_id.trim().is_empty() {
            return Err(SourceError::Config(
                "'client_id' is empty! Check your configuration file!".to_string(),
            ));
        }

        if client_secret.trim().is_empty() {
            return Err(SourceError::Config(
                "'client_secret' is empty! Check your configuration file!".to_string(),
            ));
        }

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Primetric API endpoints
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL the resource paths are appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Client-credentials token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Request timeout in seconds (default: none, the HTTP client's own behaviour)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            timeout_seconds: None,
        }
    }
}

impl ApiConfig {
    /// Point both endpoints at a single host, e.g. a mock server
    pub fn with_host(host: &str) -> Self {
        let host = host.trim_end_matches('/');
        Self {
            base_url: format!("{}/beta", host),
            token_url: format!("{}/auth/token/", host),
            timeout_seconds: None,
        }
    }

    /// Full URL of a resource collection
    pub fn resource_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [("api.base_url", &self.base_url), ("api.token_url", &self.token_url)] {
            Url::parse(value).map_err(|e| {
                SourceError::Config(format!("'{}' is not a valid URL ({}): {}", name, value, e))
            })?;
        }

        if self.timeout_seconds == Some(0) {
            return Err(SourceError::Config(
                "'api.timeout_seconds' must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    /// OTLP endpoint for exporting traces and metrics
    pub otlp_endpoint: Option<String>,
    /// Log filter (e.g., "info", "debug", "primetric_source=debug")
    pub log_filter: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// API endpoint configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a YAML (or JSON) file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;

        Self::from_str(&content)
    }

    /// Parse configuration from YAML (or JSON) text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validated client credentials
    pub fn credentials(&self) -> Result<Credentials> {
        Credentials::new(self.client_id.clone(), self.client_secret.clone())
    }

    /// Empty credentials are left to `check` to report
    fn validate(&self) -> Result<()> {
        self.api.validate()
    }
}
