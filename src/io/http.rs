use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::RangeDownloader;
use anyhow::{Result, anyhow, bail};

/// HTTP Range downloader for remote ZIP files
pub struct HttpRangeDownloader {
    client: Client,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeDownloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        })
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Send a HEAD request to verify Range support and get the object size
    pub async fn content_length(&self, url: &str) -> Result<u64> {
        let resp = self.client.head(url).send().await?;

        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        // Check if server supports Range requests
        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            bail!("Remote server does not support Range requests");
        }

        resp.headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Remote server did not return Content-Length"))
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RangeDownloader for HttpRangeDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        offset: u64,
        length: Option<u64>,
    ) -> Result<u64> {
        if length == Some(0) {
            File::create(dest).await?;
            return Ok(0);
        }

        let mut file = File::create(dest).await?;
        let mut received = 0u64;
        let mut retry_count = 0;

        loop {
            if let Some(length) = length {
                if received >= length {
                    break;
                }
            }

            let current_start = offset + received;
            let range = match length {
                Some(length) => format!("bytes={}-{}", current_start, offset + length - 1),
                None => format!("bytes={}-", current_start),
            };

            let result = self.client.get(url).header("Range", &range).send().await;

            match result {
                Ok(mut resp) => {
                    // A full-body 200 is only acceptable when the whole object was asked for.
                    let whole_object = current_start == 0 && length.is_none();
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT
                        && !(whole_object && resp.status() == reqwest::StatusCode::OK)
                    {
                        bail!("HTTP request failed with status: {}", resp.status());
                    }

                    let mut chunk_failed = false;
                    loop {
                        match resp.chunk().await {
                            Ok(Some(bytes)) => {
                                let remaining = length.map_or(u64::MAX, |l| l - received);
                                let chunk_len = (bytes.len() as u64).min(remaining) as usize;
                                file.write_all(&bytes[..chunk_len]).await?;
                                received += chunk_len as u64;
                                self.transferred_bytes
                                    .fetch_add(chunk_len as u64, Ordering::Relaxed);
                            }
                            Ok(None) => break,
                            Err(e) if e.is_timeout() || e.is_body() => {
                                warn!("Transfer of {} interrupted at byte {}: {}", url, received, e);
                                chunk_failed = true;
                                break;
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }

                    if !chunk_failed {
                        // Server sent everything it had for an open-ended range.
                        if length.is_none() || length.is_some_and(|l| received >= l) {
                            break;
                        }
                    }

                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded while downloading {}", url);
                    }
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded");
                    }
                    warn!(
                        "Connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        file.flush().await?;
        Ok(received)
    }
}
