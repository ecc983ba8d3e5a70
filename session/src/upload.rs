//! Image upload collaborator.
//!
//! Attachments are not sent over the socket. They are POSTed to an external
//! uploader as multipart form data (`file` part) and the returned URL travels
//! in the chat message instead.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

// =============================================================================
// TYPES
// =============================================================================

/// An image picked for the next send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    /// Read an image from disk, guessing its content type from the extension.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be read.
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_owned(), |n| n.to_string_lossy().into_owned());
        Ok(Self { file_name, content_type: content_type_for(path).to_owned(), bytes })
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("uploader returned status {0}")]
    Status(u16),
    #[error("uploader response has no url")]
    MissingUrl,
    #[error("no uploader configured")]
    Unavailable,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Stores an image somewhere reachable and returns its URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: ImageFile) -> Result<String, UploadError>;
}

// =============================================================================
// IMPLEMENTATIONS
// =============================================================================

/// Uploader backed by an HTTP endpoint answering `{ "url": "..." }`.
pub struct HttpUploader {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpUploader {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: ImageFile) -> Result<String, UploadError> {
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)?;
        let form = Form::new().part("file", part);

        let response = self.http.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let body: UploadResponse = response.json().await?;
        body.url
            .filter(|url| !url.is_empty())
            .ok_or(UploadError::MissingUrl)
    }
}

/// Uploader for sessions without an upload endpoint. Every upload fails.
pub struct NoUploader;

#[async_trait]
impl Uploader for NoUploader {
    async fn upload(&self, _file: ImageFile) -> Result<String, UploadError> {
        Err(UploadError::Unavailable)
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
