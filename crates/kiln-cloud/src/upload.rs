use crate::backend::{HttpBackend, UploadBackend};

pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// Uploads packaged build contexts, parameterized over the backend for
/// testability.
pub struct UploadClient<B: UploadBackend = HttpBackend> {
    backend: B,
}

impl UploadClient<HttpBackend> {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            backend: HttpBackend::new(endpoint),
        }
    }
}

impl<B: UploadBackend> UploadClient<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Exchange `digest` for an upload URL, PUT the archive there, and
    /// return the URL without its query string (the signature).
    ///
    /// No retries: a failed attempt is reported as-is.
    pub async fn upload(&self, archive: Vec<u8>, digest: Option<&str>) -> Result<String, UploadError> {
        let url = self
            .backend
            .create_upload_url(digest.map(str::to_owned))
            .await?;
        tracing::debug!(digest, bytes = archive.len(), "uploading build context");

        let status = self.backend.put(&url, ARCHIVE_CONTENT_TYPE, archive).await?;
        if status != 200 {
            return Err(UploadError::Status { status });
        }

        let location = strip_query(&url)?;
        tracing::info!(url = %location, "build context uploaded");
        Ok(location)
    }
}

fn strip_query(url: &str) -> Result<String, UploadError> {
    let mut parsed = reqwest::Url::parse(url).map_err(|e| UploadError::InvalidUrl {
        url: url.to_owned(),
        detail: e.to_string(),
    })?;
    parsed.set_query(None);
    Ok(parsed.into())
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("control plane rejected upload URL request: {detail}")]
    ControlPlane { detail: String },

    #[error("upload request failed")]
    Transport { source: reqwest::Error },

    #[error("HTTP PUT failed with status code {status}")]
    Status { status: u16 },

    #[error("control plane returned an invalid upload URL {url}: {detail}")]
    InvalidUrl { url: String, detail: String },
}
