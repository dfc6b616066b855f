//! Request transport

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::str::FromStr;
use tracing::debug;

use crate::config::HttpConfig;
use crate::errors::HttpError;
use crate::types::RequestDefinition;

/// Header carrying the per-request correlation id
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// What the engine needs to know about a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: u64,
    pub body: String,
    pub correlation_id: String,
}

/// Sends request definitions to a target server
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, server: &str, request: &RequestDefinition) -> Result<HttpResponse, HttpError>;
}

/// [`Transport`] over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        debug!(
            "Creating HTTP transport with {}s timeout",
            config.timeout.as_secs()
        );

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(refresh) = config.client_refresh {
            builder = builder.pool_idle_timeout(refresh);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, server: &str, request: &RequestDefinition) -> Result<HttpResponse, HttpError> {
        let url = join_url(server, &request.path)?;
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            let name = HeaderName::from_str(key).map_err(|_| HttpError::InvalidHeader(key.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| HttpError::InvalidHeader(key.clone()))?;
            headers.insert(name, value);
        }
        headers.insert(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_str(&correlation_id)
                .map_err(|_| HttpError::InvalidHeader(CORRELATION_HEADER.to_string()))?,
        );

        let mut builder = self
            .client
            .request(reqwest::Method::from(request.verb), url)
            .headers(headers);

        if let Some(body) = request.body.as_deref().filter(|b| !b.trim().is_empty()) {
            if let Some(media_type) = request.content_media_type.as_deref() {
                builder = builder.header(CONTENT_TYPE, media_type);
            }
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            content_type,
            content_length: body.len() as u64,
            body,
            correlation_id,
        })
    }
}

/// Resolve a request path against a server base URL
pub(crate) fn join_url(server: &str, path: &str) -> Result<url::Url, HttpError> {
    let joined = format!(
        "{}/{}",
        server.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url::Url::parse(&joined).map_err(|e| HttpError::InvalidUrl(format!("{}: {}", joined, e)))
}
