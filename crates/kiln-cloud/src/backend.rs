use serde::{Deserialize, Serialize};

use crate::upload::UploadError;

/// Abstraction over the control plane and object store for testability.
///
/// Production code uses [`HttpBackend`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait UploadBackend: Send + Sync {
    /// Ask the control plane for a write-once upload URL. A `None` digest
    /// means the caller wants a fresh location regardless of prior uploads.
    async fn create_upload_url(&self, digest: Option<String>) -> Result<String, UploadError>;

    /// PUT `body` to `url`, returning the HTTP status code.
    async fn put(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<u16, UploadError>;
}

#[derive(Serialize)]
struct UploadUrlRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    url: String,
}

/// reqwest-backed implementation talking to `{endpoint}/upload-url`.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl UploadBackend for HttpBackend {
    async fn create_upload_url(&self, digest: Option<String>) -> Result<String, UploadError> {
        let resp = self
            .client
            .post(format!("{}/upload-url", self.endpoint))
            .json(&UploadUrlRequest { digest })
            .send()
            .await
            .map_err(|e| UploadError::Transport { source: e })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                // arch-lint: allow(no-silent-result-drop) reason="the response body only adds detail to an error already being returned"
                .unwrap_or_default();
            return Err(UploadError::ControlPlane {
                detail: format!("{status}: {}", body.trim()),
            });
        }

        let parsed: UploadUrlResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::Transport { source: e })?;
        Ok(parsed.url)
    }

    async fn put(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<u16, UploadError> {
        let resp = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Transport { source: e })?;
        Ok(resp.status().as_u16())
    }
}
