//! Streaming downloads.
//!
//! [`Fetcher`] is the network seam of the artifact pipeline; [`HttpFetcher`]
//! implements it on `reqwest`, streaming the body to disk chunk by chunk.
//! The body lands in `<dest>.part` and is renamed into place once complete,
//! so an interrupted transfer never leaves a file at `dest`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Progress callback: bytes received so far, total size if known.
pub type Progress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` into the file at `dest`, returning the byte count.
    ///
    /// A failed transfer must not leave a partial file behind.
    async fn download(&self, url: &str, dest: &Path, progress: Progress<'_>) -> Result<u64>;

    /// Fetch a small text body, such as a companion digest file.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::network(url, e))
    }

    async fn stream_to(
        response: reqwest::Response,
        url: &str,
        dest: &Path,
        progress: Progress<'_>,
    ) -> Result<u64> {
        let total = response.content_length();
        let mut file = File::create(dest).await.map_err(|e| Error::io_at(dest, e))?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        progress(0, total);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::network(url, e))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress(received, total);
        }

        file.flush().await?;
        Ok(received)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, url: &str, dest: &Path, progress: Progress<'_>) -> Result<u64> {
        tracing::debug!("Downloading {url} -> {}", dest.display());
        let response = self.get(url).await?;
        let part = partial_path(dest);

        match Self::stream_to(response, url, &part, progress).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest)
                    .await
                    .map_err(|e| Error::io_at(dest, e))?;
                Ok(bytes)
            }
            Err(e) => {
                tokio::fs::remove_file(&part).await.ok();
                Err(e)
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        tracing::debug!("Fetching {url}");
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| Error::network(url, e))
    }
}

/// `<dest>.part`, where a download is written until it completes.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
