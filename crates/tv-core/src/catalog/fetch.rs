//! Fetching a catalog source (remote URL, local file, or inline text).

use futures_util::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use super::parse::{parse_catalog, ParsedCatalog};

pub const PROGRESS_IDLE: u8 = 0;
pub const PROGRESS_CONNECT: u8 = 10;
pub const PROGRESS_FETCHED: u8 = 60;
pub const PROGRESS_PARSED: u8 = 100;

/// Sender half of the import progress observer (0..=100).
pub type ProgressSender = watch::Sender<u8>;

/// Where a catalog comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Remote(String),
    File(PathBuf),
    Inline(String),
}

impl CatalogSource {
    /// Classify a configured source string.
    pub fn parse(source: &str) -> Self {
        let trimmed = source.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::Remote(trimmed.to_string());
        }
        if lower.starts_with("file://") {
            let path = &trimmed["file://".len()..];
            return Self::File(PathBuf::from(
                percent_encoding::percent_decode_str(path)
                    .decode_utf8_lossy()
                    .into_owned(),
            ));
        }
        if trimmed.starts_with('[') || trimmed.starts_with("#EXT") {
            return Self::Inline(trimmed.to_string());
        }
        Self::File(PathBuf::from(trimmed))
    }

    /// Short human-readable description used in errors and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Remote(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
            Self::Inline(text) => format!("inline ({} bytes)", text.len()),
        }
    }
}

/// Host-provided permission to read local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageGrant {
    Granted,
    Denied,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub storage: StorageGrant,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            storage: StorageGrant::Granted,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadCause {
    #[error("storage read permission not granted")]
    PermissionDenied,
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed catalog: {0}")]
    Malformed(String),
}

/// Whole-source failure.  The previously loaded catalog stays active.
#[derive(Debug, Error)]
#[error("failed to load catalog from {location}: {cause}")]
pub struct CatalogLoadError {
    pub location: String,
    #[source]
    pub cause: LoadCause,
}

/// Fetch and parse `source`, reporting coarse milestones on `progress`.
pub async fn fetch_catalog(
    source: &CatalogSource,
    options: &FetchOptions,
    progress: Option<&ProgressSender>,
) -> Result<ParsedCatalog, CatalogLoadError> {
    let report = |value: u8| {
        if let Some(tx) = progress {
            tx.send_replace(value);
        }
    };
    let fail = |cause: LoadCause| {
        report(PROGRESS_IDLE);
        CatalogLoadError {
            location: source.describe(),
            cause,
        }
    };

    report(PROGRESS_CONNECT);
    let body = match source {
        CatalogSource::Remote(url) => fetch_remote(url, options.timeout, progress)
            .await
            .map_err(fail)?,
        CatalogSource::File(path) => {
            if options.storage == StorageGrant::Denied {
                return Err(fail(LoadCause::PermissionDenied));
            }
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| fail(LoadCause::Io(e)))?
        }
        CatalogSource::Inline(text) => text.clone(),
    };
    report(PROGRESS_FETCHED);

    let parsed = parse_catalog(&body).map_err(|e| fail(LoadCause::Malformed(e)))?;
    info!(
        "Parsed {} channels from {} ({} skipped)",
        parsed.records.len(),
        source.describe(),
        parsed.skipped
    );
    report(PROGRESS_PARSED);
    Ok(parsed)
}

async fn fetch_remote(
    url: &str,
    timeout: Duration,
    progress: Option<&ProgressSender>,
) -> Result<String, LoadCause> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(LoadCause::Status(response.status().as_u16()));
    }

    let total = response.content_length();
    let mut received: u64 = 0;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        received += chunk.len() as u64;
        body.extend_from_slice(&chunk);
        if let (Some(tx), Some(total)) = (progress, total.filter(|t| *t > 0)) {
            let span = u64::from(PROGRESS_FETCHED - PROGRESS_CONNECT);
            let step = (received.min(total) * span / total) as u8;
            tx.send_replace(PROGRESS_CONNECT + step);
        }
    }
    debug!("catalog: fetched {} bytes from {}", received, url);

    String::from_utf8(body).map_err(|e| LoadCause::Malformed(format!("body is not UTF-8: {e}")))
}

fn classify(err: reqwest::Error) -> LoadCause {
    if err.is_timeout() {
        LoadCause::Timeout
    } else {
        LoadCause::Network(err)
    }
}
