//! Format menu for `/api/video_info` and the rule that picks one stream for a
//! download request.

use serde::Serialize;

use crate::extractor::{ExtractError, StreamDescriptor, StreamKind, VideoInfo};

pub const BEST: &str = "best";
pub const VIDEO_BEST: &str = "video_best";
pub const AUDIO_BEST: &str = "audio_best";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFormat {
    pub id: String,
    pub display: String,
    pub resolution: String,
    pub extension: String,
    pub has_audio: bool,
    pub filesize: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioFormat {
    pub id: String,
    pub display: String,
    pub extension: String,
    pub filesize: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredefinedFormat {
    pub id: String,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatListing {
    pub video: Vec<VideoFormat>,
    pub audio: Vec<AudioFormat>,
    pub predefined: Vec<PredefinedFormat>,
}

fn size_suffix(filesize: Option<u64>) -> String {
    filesize
        .map(|bytes| format!(" - {:.1} MB", bytes as f64 / (1024.0 * 1024.0)))
        .unwrap_or_default()
}

pub fn list_formats(info: &VideoInfo) -> FormatListing {
    let mut video_streams: Vec<&StreamDescriptor> = info
        .streams
        .iter()
        .filter(|stream| stream.kind.has_video())
        .collect();
    video_streams.sort_by(|a, b| {
        b.height
            .cmp(&a.height)
            .then_with(|| b.kind.has_audio().cmp(&a.kind.has_audio()))
    });
    let video = video_streams
        .into_iter()
        .map(|stream| {
            let resolution = stream.resolution_label();
            let has_audio = stream.kind.has_audio();
            let audio_note = if has_audio { "with audio" } else { "no audio" };
            VideoFormat {
                id: stream.format_id.clone(),
                display: format!(
                    "{resolution} ({}){} [{audio_note}]",
                    stream.ext.to_uppercase(),
                    size_suffix(stream.filesize)
                ),
                resolution,
                extension: stream.ext.clone(),
                has_audio,
                filesize: stream.filesize,
            }
        })
        .collect::<Vec<_>>();

    let mut audio_streams: Vec<&StreamDescriptor> = info
        .streams
        .iter()
        .filter(|stream| stream.kind == StreamKind::AudioOnly)
        .collect();
    audio_streams.sort_by(|a, b| b.bitrate_kbps.cmp(&a.bitrate_kbps));
    let audio = audio_streams
        .into_iter()
        .map(|stream| {
            let bitrate = stream
                .bitrate_kbps
                .map(|kbps| format!(" {kbps}kbps"))
                .unwrap_or_default();
            AudioFormat {
                id: stream.format_id.clone(),
                display: format!(
                    "Audio{bitrate} ({}){}",
                    stream.ext.to_uppercase(),
                    size_suffix(stream.filesize)
                ),
                extension: stream.ext.clone(),
                filesize: stream.filesize,
            }
        })
        .collect::<Vec<_>>();

    let mut predefined = vec![PredefinedFormat {
        id: BEST.into(),
        display: "Best available quality".into(),
    }];
    if !video.is_empty() {
        predefined.push(PredefinedFormat {
            id: VIDEO_BEST.into(),
            display: "Best video quality".into(),
        });
    }
    if !audio.is_empty() {
        predefined.push(PredefinedFormat {
            id: AUDIO_BEST.into(),
            display: "Best audio quality".into(),
        });
    }

    FormatListing {
        video,
        audio,
        predefined,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedKind {
    Video,
    Audio,
}

impl RequestedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Kind echoed back as `format_type` for a raw format id.
pub fn requested_kind(format_id: &str) -> RequestedKind {
    if format_id.trim().starts_with("audio") {
        RequestedKind::Audio
    } else {
        RequestedKind::Video
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSelector {
    BestVideo,
    BestAudio,
    Exact(String),
}

impl FormatSelector {
    pub fn parse(format_id: &str) -> Self {
        match format_id.trim() {
            "" | BEST | VIDEO_BEST => Self::BestVideo,
            AUDIO_BEST => Self::BestAudio,
            other => Self::Exact(other.to_string()),
        }
    }

    pub fn requested_kind(&self) -> RequestedKind {
        match self {
            Self::BestVideo => RequestedKind::Video,
            Self::BestAudio => RequestedKind::Audio,
            Self::Exact(id) => requested_kind(id),
        }
    }
}

fn best_by<'a, K: Ord>(
    streams: &'a [StreamDescriptor],
    kind: StreamKind,
    key: impl Fn(&StreamDescriptor) -> K,
) -> Option<&'a StreamDescriptor> {
    streams
        .iter()
        .filter(|stream| stream.kind == kind)
        .max_by_key(|stream| key(stream))
}

/// Picks the stream to download. Exact id match first, then the best stream of
/// the requested type, then whatever exists.
pub fn select_stream<'a>(
    streams: &'a [StreamDescriptor],
    selector: &FormatSelector,
) -> Result<&'a StreamDescriptor, ExtractError> {
    if let FormatSelector::Exact(id) = selector
        && let Some(stream) = streams.iter().find(|stream| &stream.format_id == id)
    {
        return Ok(stream);
    }

    let fallback = match selector.requested_kind() {
        RequestedKind::Audio => best_by(streams, StreamKind::AudioOnly, |s| {
            (s.bitrate_kbps, s.filesize)
        }),
        RequestedKind::Video => {
            best_by(streams, StreamKind::Muxed, |s| (s.height, s.bitrate_kbps))
                .or_else(|| best_by(streams, StreamKind::VideoOnly, |s| (s.height, s.bitrate_kbps)))
        }
    };

    fallback.or_else(|| streams.first()).ok_or(ExtractError::NoStreams)
}
