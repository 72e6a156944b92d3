//! File downloads for links that match the download criteria
//!
//! Bodies are streamed to disk chunk by chunk and never decoded.

use crate::crawler::fetcher::{FetchClient, FetchOutcome};
use crate::crawler::response::content_disposition_filename;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Name used when a URL yields no usable file name
const FALLBACK_FILE_NAME: &str = "download";

/// Result of downloading one file
#[derive(Debug)]
pub enum DownloadResult {
    Saved(PathBuf),
    Failed(String),
    Cancelled,
}

impl DownloadResult {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved(_))
    }
}

/// Saves files discovered during a crawl
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &Url, caller: &str) -> DownloadResult;
}

/// Writes files under `<output dir>/downloads`
///
/// Downloads go through the crawl's own [`FetchClient`], so they share its
/// proxy ladder and rate limiter but bypass its response cache.
pub struct FileDownloader {
    client: Arc<FetchClient>,
    dir: PathBuf,
}

impl FileDownloader {
    pub fn new(client: Arc<FetchClient>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            client,
            dir: output_dir.as_ref().join("downloads"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a new file named after `preferred`, suffixing `_1`, `_2`, ...
    /// until the name is free
    ///
    /// `create_new` makes the check and the creation one step, so concurrent
    /// downloads can never claim the same name.
    async fn create_unique(&self, preferred: &str) -> std::io::Result<(PathBuf, File)> {
        let (stem, ext) = match preferred.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
            _ => (preferred, String::new()),
        };

        let mut candidate = preferred.to_string();
        let mut counter = 1;
        loop {
            let path = self.dir.join(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    candidate = format!("{}_{}{}", stem, counter, ext);
                    counter += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Copies a response body into `file` as it arrives
async fn write_body(response: Response, mut file: File) -> crate::Result<u64> {
    let mut written = 0;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[async_trait]
impl Downloader for FileDownloader {
    async fn download(&self, url: &Url, caller: &str) -> DownloadResult {
        let response = match self.client.open_stream(url.as_str(), caller).await {
            Ok(response) => response,
            Err(FetchOutcome::Cancelled) => return DownloadResult::Cancelled,
            Err(failure) => {
                tracing::warn!("Download failed for {}: {}", url, failure);
                return DownloadResult::Failed(failure.to_string());
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            return DownloadResult::Failed(e.to_string());
        }

        let preferred = content_disposition_filename(response.headers())
            .map(|name| sanitize_file_name(&name))
            .unwrap_or_else(|| file_name_from_url(url));
        let (path, file) = match self.create_unique(&preferred).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!("Failed to create {} in {}: {}", preferred, self.dir.display(), e);
                return DownloadResult::Failed(e.to_string());
            }
        };

        match write_body(response, file).await {
            Ok(bytes) => {
                tracing::info!("Downloaded {} ({} bytes) to {}", url, bytes, path.display());
                DownloadResult::Saved(path)
            }
            Err(e) => {
                tracing::error!("Failed to save {} to {}: {}", url, path.display(), e);
                // Partial files would pass for complete downloads
                let _ = tokio::fs::remove_file(&path).await;
                DownloadResult::Failed(e.to_string())
            }
        }
    }
}

/// File name from the last path segment of a URL
pub fn file_name_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    sanitize_file_name(segment)
}

/// Replaces characters that are unsafe in file names
///
/// Keeps ASCII letters, digits, `.`, `-` and `_`. Leading dots are dropped
/// so the result is never hidden or a relative path component.
pub fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}
