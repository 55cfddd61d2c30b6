use std::fmt;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Credentials;
use crate::error::{Result, SourceError};
use crate::telemetry::get_metrics;

/// Bearer token obtained from the client-credentials exchange
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Form body of the token request.
/// `refresh_token` is always `None` and therefore left out of the encoded form.
#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Exchanges client credentials for an access token
#[derive(Clone)]
pub struct TokenProvider {
    client: Client,
    token_url: String,
}

impl TokenProvider {
    pub fn new(client: Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Send the raw token request; a single attempt, no retry
    pub(crate) async fn request_token(
        &self,
        credentials: &Credentials,
    ) -> Result<reqwest::Response> {
        let request = TokenRequest {
            grant_type: "client_credentials",
            client_id: credentials.client_id(),
            client_secret: credentials.client_secret(),
            refresh_token: None,
        };

        if let Some(m) = get_metrics() {
            m.token_requests.add(1, &[]);
        }

        info!(
            client_id = %credentials.client_id(),
            url = %self.token_url,
            "Requesting access token"
        );

        let response = self
            .client
            .post(&self.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&request)
            .send()
            .await
            .map_err(|e| {
                token_error(SourceError::Auth(format!(
                    "Error while refreshing access token: {}",
                    e
                )))
            })?;

        if !response.status().is_success() {
            return Err(token_error(SourceError::Auth(format!(
                "Token request for client '{}' failed: HTTP {}",
                credentials.client_id(),
                response.status()
            ))));
        }

        Ok(response)
    }

    /// Fetch a bearer token for the given credentials
    pub async fn fetch_token(&self, credentials: &Credentials) -> Result<AccessToken> {
        let response = self.request_token(credentials).await?;

        let body: TokenResponse = response.json().await.map_err(|e| {
            token_error(SourceError::Parse(format!(
                "Failed to parse token response: {}",
                e
            )))
        })?;

        let token = body.access_token.ok_or_else(|| {
            token_error(SourceError::Parse(
                "Token response missing 'access_token'".to_string(),
            ))
        })?;

        if token.is_empty() {
            return Err(token_error(SourceError::Auth(
                "Token endpoint returned an empty access token".to_string(),
            )));
        }

        info!(client_id = %credentials.client_id(), "Access token acquired");
        Ok(AccessToken::new(token))
    }
}

fn token_error(err: SourceError) -> SourceError {
    if let Some(m) = get_metrics() {
        m.token_errors.add(1, &[]);
    }
    error!("{}", err);
    err
}
