//! Stream resolution: source string in, `StreamDescriptor` out.
//!
//! ```text
//! source ──parse──▶ SourceSpec ──classify──▶ Native ───────────────▶ descriptor
//!                                   │
//!                                   ├──────▶ Portal ──scrape──▶ EmbeddedBrowser (manifest)
//!                                   │                    └────▶ EmbeddedBrowser (page, fallback)
//!                                   └──────▶ EmbeddedBrowser
//! ```
//!
//! Nothing here fails for a reachable-but-unplayable channel: every problem
//! is recorded in `Resolution::issues` and the best descriptor available is
//! still returned.

pub mod extract;
pub mod gate;

use futures_util::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::ResolverConfig;
use crate::source::{parse_source, ClearKey, DrmError, SourceError, SourceSpec};

pub use extract::{Extractor, HostFilter, PortalTable};
pub use gate::{ActiveStream, ResolveGate, ResolveTicket};

/// Which decoder the Playback Surface should hand the descriptor to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetDecoder {
    Native,
    EmbeddedBrowser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub target: TargetDecoder,
    pub media_url: String,
    pub http_headers: BTreeMap<String, String>,
    pub user_agent: String,
    pub drm: Option<ClearKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid source: {0}")]
    InvalidSource(#[from] SourceError),
    #[error("channel has no source #{0}")]
    NoSuchSource(usize),
    #[error("no stream found on {0}")]
    NoStreamFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed DRM license: {0}")]
    MalformedDrmLicense(#[from] DrmError),
}

/// A descriptor plus every degradation hit on the way to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub descriptor: StreamDescriptor,
    pub issues: Vec<ResolveError>,
}

impl Resolution {
    /// Human-readable summary of the issues, for the channel's error status.
    pub fn issue_summary(&self) -> Option<String> {
        if self.issues.is_empty() {
            return None;
        }
        Some(
            self.issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Native,
    Portal,
    Browser,
}

const NATIVE_SUFFIXES: &[&str] = &[".m3u8", ".ts", ".mpd"];
const NATIVE_SCHEMES: &[&str] = &["rtmp", "rtmps", "rtsp"];

/// Decide how a parsed source is played.  Pure.
pub fn classify(spec: &SourceSpec, portals: &PortalTable) -> Route {
    if spec.has_drm_block() {
        return Route::Native;
    }
    match Url::parse(&spec.base_url) {
        Ok(url) => {
            if NATIVE_SCHEMES.contains(&url.scheme()) {
                return Route::Native;
            }
            let path = url.path().to_ascii_lowercase();
            if NATIVE_SUFFIXES.iter().any(|s| path.ends_with(s)) {
                return Route::Native;
            }
            match url.host_str() {
                Some(host) if portals.is_portal(host) => Route::Portal,
                _ => Route::Browser,
            }
        }
        Err(_) => {
            // Not a URL reqwest understands; fall back to a plain suffix check.
            let lower = spec.base_url.to_ascii_lowercase();
            let path = lower.split(['?', '#']).next().unwrap_or_default();
            if NATIVE_SUFFIXES.iter().any(|s| path.ends_with(s))
                || NATIVE_SCHEMES.iter().any(|s| lower.starts_with(&format!("{s}://")))
            {
                Route::Native
            } else {
                Route::Browser
            }
        }
    }
}

pub struct StreamResolver {
    client: reqwest::Client,
    portals: PortalTable,
    user_agent: String,
    scrape_timeout: Duration,
    max_scrape_bytes: usize,
}

impl StreamResolver {
    pub fn new(config: &ResolverConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.scrape_timeout_secs.max(1)))
            .build()?;
        let portals = PortalTable::builtin(&config.extra_portal_hosts)?;
        debug!(
            "resolver: {} portal hosts, extractors [{}]",
            portals.portals().len(),
            portals
                .extractors()
                .iter()
                .map(|e| e.name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            client,
            portals,
            user_agent: config.user_agent.clone(),
            scrape_timeout: Duration::from_secs(config.scrape_timeout_secs.max(1)),
            max_scrape_bytes: config.max_scrape_bytes.max(1),
        })
    }

    /// Resolve the source the channel currently has selected.
    pub async fn resolve(&self, channel: &Channel) -> Result<Resolution, ResolveError> {
        let index = channel.status.get().source_index;
        self.resolve_source(channel, index).await
    }

    /// Resolve `channel.sources[index]`.
    pub async fn resolve_source(
        &self,
        channel: &Channel,
        index: usize,
    ) -> Result<Resolution, ResolveError> {
        let source = channel
            .sources
            .get(index)
            .ok_or(ResolveError::NoSuchSource(index))?;
        info!(
            "Resolving {:?} source {}/{}",
            channel.title,
            index + 1,
            channel.sources.len()
        );
        Ok(self.resolve_str(source).await)
    }

    pub async fn resolve_str(&self, source: &str) -> Resolution {
        let spec = match parse_source(source) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("resolver: {}", e);
                return Resolution {
                    descriptor: StreamDescriptor {
                        target: TargetDecoder::EmbeddedBrowser,
                        media_url: source.trim().to_string(),
                        http_headers: BTreeMap::new(),
                        user_agent: self.user_agent.clone(),
                        drm: None,
                    },
                    issues: vec![e.into()],
                };
            }
        };

        let mut issues = Vec::new();
        let user_agent = spec
            .user_agent
            .clone()
            .unwrap_or_else(|| self.user_agent.clone());
        let mut headers: BTreeMap<String, String> = spec
            .header_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let drm = match spec.clearkey() {
            Ok(drm) => drm,
            Err(e) => {
                warn!("resolver: ignoring DRM block: {}", e);
                issues.push(ResolveError::MalformedDrmLicense(e));
                None
            }
        };

        let route = classify(&spec, &self.portals);
        debug!("resolver: {} routed {:?}", spec.base_url, route);

        let (target, media_url) = match route {
            Route::Native => (TargetDecoder::Native, spec.base_url.clone()),
            Route::Browser => (TargetDecoder::EmbeddedBrowser, spec.base_url.clone()),
            Route::Portal => match self.scrape(&spec.base_url, &user_agent, &headers).await {
                Ok(manifest) => {
                    headers
                        .entry("Referer".to_string())
                        .or_insert_with(|| spec.base_url.clone());
                    (TargetDecoder::EmbeddedBrowser, manifest)
                }
                Err(e) => {
                    warn!("resolver: scrape of {} failed: {}", spec.base_url, e);
                    issues.push(e);
                    (TargetDecoder::EmbeddedBrowser, spec.base_url.clone())
                }
            },
        };

        Resolution {
            descriptor: StreamDescriptor {
                target,
                media_url,
                http_headers: headers,
                user_agent,
                drm,
            },
            issues,
        }
    }

    async fn scrape(
        &self,
        page_url: &str,
        user_agent: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, ResolveError> {
        let page = Url::parse(page_url)
            .map_err(|e| ResolveError::Network(format!("invalid portal URL: {e}")))?;

        let mut request = self
            .client
            .get(page.clone())
            .header(reqwest::header::USER_AGENT, user_agent);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let body = tokio::time::timeout(
            self.scrape_timeout,
            fetch_capped(request, self.max_scrape_bytes),
        )
        .await
        .map_err(|_| {
            ResolveError::Network(format!(
                "portal did not answer within {}s",
                self.scrape_timeout.as_secs()
            ))
        })??;

        match self.portals.extract(&page, &body) {
            Some((extractor, manifest)) => {
                info!("resolver: {} matched {} -> {}", page_url, extractor, manifest);
                Ok(manifest)
            }
            None => Err(ResolveError::NoStreamFound(page_url.to_string())),
        }
    }
}

async fn fetch_capped(
    request: reqwest::RequestBuilder,
    max_bytes: usize,
) -> Result<String, ResolveError> {
    let response = request.send().await.map_err(network)?;
    if !response.status().is_success() {
        return Err(ResolveError::Network(format!(
            "HTTP {}",
            response.status().as_u16()
        )));
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.map_err(network)?);
        if body.len() >= max_bytes {
            debug!("resolver: portal body capped at {} bytes", max_bytes);
            body.truncate(max_bytes);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn network(err: reqwest::Error) -> ResolveError {
    ResolveError::Network(err.to_string())
}
