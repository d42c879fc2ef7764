//! HTTP statement source for one learning record store.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Url};

use tcv_core::render::truncate;
use tcv_core::{
    ContinuationToken, LrsConfig, QueryDescriptor, SourceId, StatementPage, TcvError,
};

use crate::source::{FetchError, StatementSource};

const VERSION_HEADER: &str = "X-Experience-API-Version";

/// Longest error body excerpt kept in a [`FetchError::Status`].
const BODY_EXCERPT: usize = 200;

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LrsClient {
    id: SourceId,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
    client: Client,
}

impl LrsClient {
    pub fn new(config: &LrsConfig, timeout: Duration) -> tcv_core::Result<Self> {
        let endpoint = Url::parse(&config.endpoint_url()).map_err(|e| {
            TcvError::config(format!("invalid LRS endpoint '{}': {}", config.endpoint, e))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            VERSION_HEADER,
            HeaderValue::from_static(config.version.as_str()),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TcvError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            id: config.source_id(),
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn query_url(&self, query: &QueryDescriptor) -> Result<Url, FetchError> {
        let raw = query.query_url(self.endpoint.as_str(), self.id.version());
        Url::parse(&raw).map_err(|e| FetchError::Decode(format!("bad query URL {}: {}", raw, e)))
    }

    /// Resolve a continuation token against the endpoint.
    pub fn more_url(&self, token: &ContinuationToken) -> Result<Url, FetchError> {
        self.endpoint.join(token.as_str()).map_err(|e| {
            FetchError::Decode(format!("bad continuation URL {}: {}", token, e))
        })
    }

    async fn fetch(&self, url: Url) -> Result<StatementPage, FetchError> {
        tracing::debug!("GET {} ({})", url, self.id);

        let mut request = self.client.get(url);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(body.trim(), BODY_EXCERPT),
            });
        }

        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl StatementSource for LrsClient {
    fn id(&self) -> &SourceId {
        &self.id
    }

    async fn query(&self, query: &QueryDescriptor) -> Result<StatementPage, FetchError> {
        let url = self.query_url(query)?;
        self.fetch(url).await
    }

    async fn more(&self, token: &ContinuationToken) -> Result<StatementPage, FetchError> {
        let url = self.more_url(token)?;
        self.fetch(url).await
    }
}
