//! Resolve the requested document into a file inside the request workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Url};
use uuid::Uuid;

use super::types::SourceError;

const DEFAULT_EXTENSION: &str = ".pdf";

/// Location of the document a request refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// HTTP or HTTPS URL fetched into the workspace.
    Remote(Url),
    /// File already present on the local filesystem.
    Local(PathBuf),
}

impl DocumentSource {
    /// Interpret a caller-supplied location.
    ///
    /// Inputs starting with `http://` or `https://` must parse as URLs; anything else is treated
    /// as a filesystem path.
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SourceError::InvalidLocation(
                "document location is empty".into(),
            ));
        }

        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            let url = Url::parse(trimmed)
                .map_err(|error| SourceError::InvalidLocation(format!("{trimmed}: {error}")))?;
            return Ok(Self::Remote(url));
        }

        Ok(Self::Local(PathBuf::from(trimmed)))
    }

    /// Whether the document must be downloaded.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Human-readable identity recorded on extracted pages.
    pub fn display_name(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => path.display().to_string(),
        }
    }
}

/// Lowercased extension (with leading dot) taken from the URL path, ignoring the query string.
///
/// Falls back to `.pdf` when the path has no extension.
pub fn extension_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// HTTP fetcher for remote documents.
#[derive(Clone)]
pub struct Downloader {
    http: Client,
}

impl Downloader {
    /// Build a downloader whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("docqa/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Download `url` into `workspace`, keeping the extension from the URL path.
    pub async fn fetch(&self, url: &Url, workspace: &Path) -> Result<PathBuf, SourceError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        let extension = extension_from_url(url);
        let target = workspace.join(format!("download-{}{extension}", Uuid::new_v4()));
        tokio::fs::write(&target, &bytes).await?;

        tracing::debug!(
            url = %url,
            bytes = bytes.len(),
            path = %target.display(),
            "Downloaded document"
        );
        Ok(target)
    }
}
