//! REST implementation of the backing store traits

use super::{
    BackendError, BackendResult, PathRecord, PathRecordBackend, PathRecordUpdate, ProgressBackend,
    ProgressRecord, ProgressUpdate, Variable, VariableBackend, VariableWriteRequest,
};
use crate::definition::PathId;
use async_trait::async_trait;
use makerpath_config::BackendConfig;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

const HTTP_UNAUTHORIZED: u16 = 401;
const HTTP_FORBIDDEN: u16 = 403;
const HTTP_NOT_FOUND: u16 = 404;

/// Backing store reached over HTTP
///
/// Paths live under `/paths/{id}`, variables under `/variables` and progress
/// under `/progress`, all relative to `base_url`. Bodies are camelCase JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBackend {
    /// Backend without authentication or timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
        }
    }

    /// Send `token` as a bearer token with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Build a backend from loaded configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    /// Base URL with any trailing slash removed
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> BackendResult<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        trace!("{} -> {}", what, status);

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            HTTP_NOT_FOUND => BackendError::NotFound(what.to_string()),
            HTTP_UNAUTHORIZED | HTTP_FORBIDDEN => BackendError::Unauthorized(what.to_string()),
            code => BackendError::Api { status: code, body },
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PathRecordBackend for HttpBackend {
    async fn get_path(&self, path_id: PathId) -> BackendResult<PathRecord> {
        debug!("Fetching path {}", path_id);
        let what = format!("GET /paths/{path_id}");
        let request = self.client.get(self.url(&format!("/paths/{path_id}")));
        let response = self.send(request, &what).await?;
        Self::decode(response).await
    }

    async fn update_path(&self, path_id: PathId, update: &PathRecordUpdate) -> BackendResult<()> {
        debug!("Updating path {}", path_id);
        let what = format!("PATCH /paths/{path_id}");
        let request = self
            .client
            .patch(self.url(&format!("/paths/{path_id}")))
            .json(update);
        self.send(request, &what).await?;
        Ok(())
    }
}

#[async_trait]
impl VariableBackend for HttpBackend {
    async fn list_variables(&self, path_id: PathId) -> BackendResult<Vec<Variable>> {
        let what = format!("GET /variables?pathId={path_id}");
        let request = self
            .client
            .get(self.url(&format!("/variables?pathId={path_id}")));
        let response = self.send(request, &what).await?;
        Self::decode(response).await
    }

    async fn create_variable(&self, request: &VariableWriteRequest) -> BackendResult<()> {
        let builder = self.client.post(self.url("/variables")).json(request);
        self.send(builder, "POST /variables").await?;
        Ok(())
    }

    async fn update_variable(&self, request: &VariableWriteRequest) -> BackendResult<()> {
        let builder = self.client.put(self.url("/variables")).json(request);
        self.send(builder, "PUT /variables").await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressBackend for HttpBackend {
    async fn list_progress(&self, path_id: PathId) -> BackendResult<Vec<ProgressRecord>> {
        let what = format!("GET /progress?pathId={path_id}");
        let request = self
            .client
            .get(self.url(&format!("/progress?pathId={path_id}")));
        let response = self.send(request, &what).await?;
        Self::decode(response).await
    }

    async fn upsert_progress(&self, update: &ProgressUpdate) -> BackendResult<()> {
        let builder = self.client.post(self.url("/progress")).json(update);
        self.send(builder, "POST /progress").await?;
        Ok(())
    }
}
