use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ApiConfig, Credentials};
use crate::error::{Result, SourceError};
use crate::paginator::{Paginator, ResourceRecord};
use crate::resource::Resource;
use crate::token_provider::{AccessToken, TokenProvider};

/// Outcome of a connection check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub error: Option<String>,
}

impl ConnectionStatus {
    fn succeeded() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(err: &SourceError) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
        }
    }
}

/// One resource collection, authenticated and ready to read
pub struct ResourceStream {
    resource: Resource,
    paginator: Paginator,
}

impl ResourceStream {
    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn name(&self) -> &'static str {
        self.resource.name()
    }

    pub fn primary_key(&self) -> &'static str {
        self.resource.primary_key()
    }

    pub fn url(&self) -> &str {
        self.paginator.url()
    }

    pub fn token(&self) -> &Arc<AccessToken> {
        self.paginator.token()
    }

    /// Every record of the collection, fetched lazily
    pub fn records(self) -> impl Stream<Item = Result<ResourceRecord>> + Send {
        self.paginator.records()
    }
}

/// Primetric source connector
#[derive(Clone)]
pub struct PrimetricSource {
    client: Client,
    api: ApiConfig,
    tokens: TokenProvider,
}

impl PrimetricSource {
    pub fn new(api: ApiConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(secs) = api.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| SourceError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let tokens = TokenProvider::new(client.clone(), api.token_url.clone());

        Ok(Self {
            client,
            api,
            tokens,
        })
    }

    /// Check that the credentials are usable and the token endpoint accepts them.
    /// Failures are reported in the status, never returned as errors.
    pub async fn check_connection(&self, client_id: &str, client_secret: &str) -> ConnectionStatus {
        let result = async {
            let credentials = Credentials::new(client_id, client_secret)?;
            self.tokens.request_token(&credentials).await?;
            Ok::<_, SourceError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Connection check succeeded");
                ConnectionStatus::succeeded()
            }
            Err(e) => {
                warn!(error = %e, "Connection check failed");
                ConnectionStatus::failed(&e)
            }
        }
    }

    /// Authenticate once and build one stream per resource, all sharing the token
    pub async fn streams(&self, credentials: &Credentials) -> Result<Vec<ResourceStream>> {
        let token = Arc::new(self.tokens.fetch_token(credentials).await?);

        Ok(Resource::ALL
            .into_iter()
            .map(|resource| self.stream_with_token(resource, token.clone()))
            .collect())
    }

    fn stream_with_token(&self, resource: Resource, token: Arc<AccessToken>) -> ResourceStream {
        let url = self.api.resource_url(resource.path());
        ResourceStream {
            resource,
            paginator: Paginator::new(self.client.clone(), url, token),
        }
    }
}
