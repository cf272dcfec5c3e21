//! Extractor adapter: turns a video page URL into metadata plus a list of
//! directly downloadable streams.
//!
//! Backends are interchangeable behind [`Extractor`]. Fallback order and
//! retry policy are wrappers around that trait rather than part of any
//! backend.

mod invidious;
mod ytdlp;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::{BackendKind, RuntimeSettings};
use crate::fetch::Fetcher;

pub use invidious::InvidiousExtractor;
pub use ytdlp::YtDlpExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Video with an audio track.
    Muxed,
    VideoOnly,
    AudioOnly,
}

impl StreamKind {
    pub fn has_video(self) -> bool {
        matches!(self, Self::Muxed | Self::VideoOnly)
    }

    pub fn has_audio(self) -> bool {
        matches!(self, Self::Muxed | Self::AudioOnly)
    }
}

/// One candidate representation offered by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDescriptor {
    pub format_id: String,
    pub kind: StreamKind,
    pub ext: String,
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<u32>,
    pub filesize: Option<u64>,
    pub quality_label: Option<String>,
    /// Extra request headers the CDN expects (user agent, referer...).
    #[serde(skip)]
    pub http_headers: BTreeMap<String, String>,
}

impl StreamDescriptor {
    pub fn new(
        format_id: impl Into<String>,
        kind: StreamKind,
        ext: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            format_id: format_id.into(),
            kind,
            ext: ext.into(),
            url: url.into(),
            height: None,
            width: None,
            fps: None,
            bitrate_kbps: None,
            filesize: None,
            quality_label: None,
            http_headers: BTreeMap::new(),
        }
    }

    /// Label shown to users, e.g. `720p`.
    pub fn resolution_label(&self) -> String {
        self.quality_label
            .clone()
            .or_else(|| self.height.map(|height| format!("{height}p")))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub video_id: Option<String>,
    pub title: String,
    pub duration: Option<u64>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub view_count: Option<u64>,
    pub streams: Vec<StreamDescriptor>,
    /// Name of the backend that produced this result.
    pub backend: String,
}

/// Failure taxonomy shared by every backend. `Display` is the message shown to
/// end users.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Not a valid YouTube URL")]
    InvalidUrl,
    #[error("The video is unavailable or was removed")]
    Unavailable,
    #[error("This video is private")]
    Private,
    #[error("The video is age restricted and cannot be downloaded")]
    AgeRestricted,
    #[error("The video is not available in this region")]
    RegionBlocked,
    #[error("Too many requests to the video service (HTTP 429); wait a few minutes and try again")]
    RateLimited,
    #[error("The video service asked to confirm you are not a bot; try again later")]
    BotDetected,
    #[error("No downloadable streams were found for this video")]
    NoStreams,
    #[error("Extraction failed: {0}")]
    Failed(String),
}

impl ExtractError {
    /// Maps a raw backend message onto the taxonomy by known substrings.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        let has = |needle: &str| lower.contains(needle);

        if has("http error 429")
            || has("status 429")
            || has("429 too many")
            || has("too many requests")
            || has("rate limit")
            || has("ratelimit")
        {
            Self::RateLimited
        } else if has("age-restricted")
            || has("age restricted")
            || has("confirm your age")
            || has("inappropriate for some users")
        {
            Self::AgeRestricted
        } else if has("sign in to confirm")
            || has("not a bot")
            || has("captcha")
            || has("bot detection")
        {
            Self::BotDetected
        } else if has("private video") || has("video is private") {
            Self::Private
        } else if has("available in your country")
            || has("geo restrict")
            || has("geo-restrict")
            || has("blocked it in your country")
        {
            Self::RegionBlocked
        } else if has("video unavailable")
            || has("is unavailable")
            || has("has been removed")
            || has("does not exist")
            || has("no longer available")
        {
            Self::Unavailable
        } else {
            Self::Failed(raw.trim().to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self, url: &str) -> Result<VideoInfo, ExtractError>;
}

/// Tries each backend in order and returns the first success.
pub struct FallbackExtractor {
    name: String,
    backends: Vec<Arc<dyn Extractor>>,
}

impl FallbackExtractor {
    pub fn new(backends: Vec<Arc<dyn Extractor>>) -> Self {
        let name = backends
            .iter()
            .map(|backend| backend.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, backends }
    }
}

#[async_trait]
impl Extractor for FallbackExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        let mut last_error = ExtractError::Failed("no extraction backend configured".into());
        for backend in &self.backends {
            match backend.resolve(url).await {
                Ok(info) => return Ok(info),
                Err(ExtractError::InvalidUrl) => return Err(ExtractError::InvalidUrl),
                Err(err) => {
                    warn!(
                        backend = backend.name(),
                        error = %err,
                        "extractor failed, trying next backend"
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}

/// Retries retryable failures (rate limiting) a fixed number of times.
pub struct RetryingExtractor {
    inner: Arc<dyn Extractor>,
    attempts: u32,
    delay: Duration,
}

impl RetryingExtractor {
    pub fn new(inner: Arc<dyn Extractor>, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl Extractor for RetryingExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn resolve(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        let mut attempt = 1;
        loop {
            match self.inner.resolve(url).await {
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    warn!(
                        backend = self.inner.name(),
                        attempt,
                        error = %err,
                        "retrying extraction after delay"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Builds the configured backend chain.
pub fn build_extractor(settings: &RuntimeSettings, fetcher: &Fetcher) -> Arc<dyn Extractor> {
    let mut backends: Vec<Arc<dyn Extractor>> = settings
        .backends
        .iter()
        .map(|kind| {
            let backend: Arc<dyn Extractor> = match kind {
                BackendKind::YtDlp => Arc::new(YtDlpExtractor::new(settings.ytdlp_bin.clone())),
                BackendKind::Invidious => Arc::new(InvidiousExtractor::new(
                    settings.invidious_url.clone(),
                    fetcher.agent(),
                )),
            };
            Arc::new(RetryingExtractor::new(
                backend,
                settings.extract_retries,
                settings.extract_retry_delay,
            )) as Arc<dyn Extractor>
        })
        .collect();

    if backends.len() == 1 {
        backends.remove(0)
    } else {
        Arc::new(FallbackExtractor::new(backends))
    }
}

/// Reads the leading number of labels such as `720p60` or `1080p HDR`.
pub(crate) fn parse_height(label: &str) -> Option<u32> {
    let digits: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|height| *height > 0)
}
