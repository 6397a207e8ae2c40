//! JSON-over-HTTP implementation of [`Source`].

use anyhow::{Context, anyhow};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use resync_core::{CacheKey, Result, SyncError, classify_status};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::HttpConfig;
use crate::source::Source;

/// Source that resolves a key to `GET {base_url}/{part}/{part}/…`.
///
/// Also used to issue the remote calls behind mutations, so that writes and
/// reads share one error classification.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpSource {
    /// Create a source rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token: None,
        }
    }

    /// Build a source from the `[http]` configuration table.
    ///
    /// # Errors
    /// Returns an error when no base URL is configured or it does not parse.
    pub fn from_config(config: &HttpConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url()?
            .ok_or_else(|| anyhow!("http.base_url is not configured"))
            .context("cannot build HTTP source")?;
        let mut source = Self::new(base_url);
        source.token = config.token();
        Ok(source)
    }

    /// Use a preconfigured client (timeouts, proxies, …).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Resolve the URL for a cache key.
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] when the base URL cannot carry a path.
    pub fn url_for(&self, key: &CacheKey) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| SyncError::Validation(format!("base URL {} cannot carry a path", self.base_url)))?;
            segments.pop_if_empty();
            for part in key.parts() {
                segments.push(&part.to_string());
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Fetch and decode the JSON document at `url`.
    ///
    /// # Errors
    /// Returns a classified error for transport failures and non-success statuses.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }

    /// Issue a write against the resource addressed by `key`.
    ///
    /// An empty response body decodes as JSON `null`, so `R = ()` works for
    /// `204 No Content` endpoints.
    ///
    /// # Errors
    /// Returns a classified error for transport failures and non-success statuses.
    pub async fn send_json<B, R>(&self, method: Method, key: &CacheKey, body: Option<&B>) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url_for(key)?;
        debug!(%method, %url, "Sending mutation");
        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(transport_error)?;
        decode_response(response).await
    }
}

impl<T> Source<T> for HttpSource
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, key: &CacheKey) -> Result<T> {
        let url = self.url_for(key)?;
        self.get_json(url).await
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    SyncError::TransientNetwork(err.to_string())
}

async fn decode_response<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        return Err(classify_status(status.as_u16(), server_message(&text, status.as_str())));
    }
    let body: &[u8] = if body.is_empty() { b"null" } else { &body };
    serde_json::from_slice(body)
        .map_err(|err| SyncError::TransientNetwork(format!("invalid response body: {err}")))
}

/// Extract the human-readable message from an error body.
///
/// Understands `{"detail": "…"}`, `{"message": "…"}` and
/// `{"error": {"message": "…"}}`; anything else is returned as plain text.
fn server_message(body: &str, fallback: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {fallback}");
    }
    let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_owned();
    };
    ["/detail", "/message", "/error/message", "/error"]
        .iter()
        .find_map(|pointer| json.pointer(pointer).and_then(serde_json::Value::as_str))
        .map_or_else(|| trimmed.to_owned(), str::to_owned)
}
