//! Transports carrying KServe v2 messages to an inference server.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{InferenceError, InferenceResult};
use crate::protocol::{
    ErrorResponse, InferRequest, InferResponse, ModelMetadata, RepositoryModel, ServerMetadata,
};
use crate::serving::InferenceServer;

/// Operations the client needs from a server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn server_ready(&self) -> InferenceResult<bool>;

    async fn model_ready(&self, model: &str) -> InferenceResult<bool>;

    async fn server_metadata(&self) -> InferenceResult<ServerMetadata>;

    async fn model_metadata(&self, model: &str) -> InferenceResult<ModelMetadata>;

    async fn repository_index(&self) -> InferenceResult<Vec<RepositoryModel>>;

    async fn infer(&self, model: &str, request: &InferRequest) -> InferenceResult<InferResponse>;
}

/// HTTP/REST transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET` a readiness endpoint; any non-2xx status means "not ready".
    async fn ready(&self, path: &str) -> InferenceResult<bool> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().is_success())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> InferenceResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn post_json<B: serde::Serialize + ?Sized + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> InferenceResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

fn transport_error(e: reqwest::Error) -> InferenceError {
    InferenceError::Transport {
        message: e.to_string(),
        status_code: e.status().map(|s| s.as_u16()),
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> InferenceResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        return Err(InferenceError::Transport {
            message: format!("HTTP {}: {message}", status.as_u16()),
            status_code: Some(status.as_u16()),
        });
    }
    response.json::<T>().await.map_err(transport_error)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn server_ready(&self) -> InferenceResult<bool> {
        self.ready("/v2/health/ready").await
    }

    async fn model_ready(&self, model: &str) -> InferenceResult<bool> {
        self.ready(&format!("/v2/models/{model}/ready")).await
    }

    async fn server_metadata(&self) -> InferenceResult<ServerMetadata> {
        self.get_json("/v2").await
    }

    async fn model_metadata(&self, model: &str) -> InferenceResult<ModelMetadata> {
        self.get_json(&format!("/v2/models/{model}")).await
    }

    async fn repository_index(&self) -> InferenceResult<Vec<RepositoryModel>> {
        self.post_json("/v2/repository/index", &serde_json::json!({}))
            .await
    }

    async fn infer(&self, model: &str, request: &InferRequest) -> InferenceResult<InferResponse> {
        self.post_json(&format!("/v2/models/{model}/infer"), request)
            .await
    }
}

/// Calls an [`InferenceServer`] in the same process.
pub struct LocalTransport {
    server: Arc<InferenceServer>,
}

impl LocalTransport {
    pub fn new(server: Arc<InferenceServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn server_ready(&self) -> InferenceResult<bool> {
        Ok(self.server.is_ready())
    }

    async fn model_ready(&self, model: &str) -> InferenceResult<bool> {
        self.server.is_model_ready(model)
    }

    async fn server_metadata(&self) -> InferenceResult<ServerMetadata> {
        Ok(self.server.metadata())
    }

    async fn model_metadata(&self, model: &str) -> InferenceResult<ModelMetadata> {
        self.server.model_metadata(model)
    }

    async fn repository_index(&self) -> InferenceResult<Vec<RepositoryModel>> {
        Ok(self.server.repository_index())
    }

    async fn infer(&self, model: &str, request: &InferRequest) -> InferenceResult<InferResponse> {
        self.server.infer(model, request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_trims_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:8000/");
        assert_eq!(transport.base_url(), "http://localhost:8000");
        assert_eq!(
            transport.url("/v2/models/llava/infer"),
            "http://localhost:8000/v2/models/llava/infer"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is not an HTTP server.
        let transport = HttpTransport::new("http://127.0.0.1:9");
        let err = transport.server_ready().await.unwrap_err();
        assert!(matches!(err, InferenceError::Transport { status_code: None, .. }));
    }
}
