use std::{collections::BTreeMap, path::PathBuf, process::Command};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ExtractError, Extractor, StreamDescriptor, StreamKind, VideoInfo};

/// Runs the yt-dlp binary in metadata-only mode and maps its JSON dump.
pub struct YtDlpExtractor {
    binary: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        let binary = self.binary.clone();
        let target = url.to_owned();
        let output = tokio::task::spawn_blocking(move || {
            Command::new(&binary)
                .arg("--dump-single-json")
                .arg("--skip-download")
                .arg("--no-warnings")
                .arg("--no-progress")
                .arg("--no-playlist")
                .arg(&target)
                .output()
        })
        .await
        .map_err(|err| ExtractError::Failed(format!("yt-dlp task failed: {err}")))?
        .map_err(|err| ExtractError::Failed(format!("could not launch yt-dlp: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status = %output.status, stderr = %stderr.trim(), "yt-dlp failed");
            let message = stderr
                .lines()
                .rev()
                .find(|line| line.contains("ERROR"))
                .unwrap_or(stderr.trim());
            return Err(ExtractError::classify(message));
        }

        parse_dump(&output.stdout)
    }
}

#[derive(Deserialize)]
struct DumpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    description: Option<String>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<DumpThumbnail>,
    #[serde(default)]
    formats: Vec<DumpFormat>,
    // Single-format sites put the media fields on the top level.
    #[serde(flatten)]
    direct: DumpFormat,
}

#[derive(Deserialize)]
struct DumpThumbnail {
    url: String,
    width: Option<u64>,
    height: Option<u64>,
}

#[derive(Deserialize, Default)]
struct DumpFormat {
    format_id: Option<String>,
    format_note: Option<String>,
    ext: Option<String>,
    url: Option<String>,
    protocol: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    abr: Option<f64>,
    tbr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
}

impl DumpFormat {
    fn kind(&self) -> Option<StreamKind> {
        let present = |codec: &Option<String>| codec.as_deref().is_none_or(|c| c != "none");
        match (present(&self.vcodec), present(&self.acodec)) {
            (true, true) => Some(StreamKind::Muxed),
            (true, false) => Some(StreamKind::VideoOnly),
            (false, true) => Some(StreamKind::AudioOnly),
            (false, false) => None,
        }
    }

    /// Only plain HTTP(S) transfers can be copied byte for byte.
    fn is_direct(&self) -> bool {
        let url_ok = self
            .url
            .as_deref()
            .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"));
        let protocol_ok = self
            .protocol
            .as_deref()
            .is_none_or(|protocol| matches!(protocol, "http" | "https"));
        url_ok && protocol_ok
    }

    fn into_descriptor(self, fallback_id: &str) -> Option<StreamDescriptor> {
        if !self.is_direct() {
            return None;
        }
        let kind = self.kind()?;
        let url = self.url?;
        let format_id = self.format_id.unwrap_or_else(|| fallback_id.to_string());
        let ext = self.ext.unwrap_or_else(|| "mp4".to_string());

        let mut stream = StreamDescriptor::new(format_id, kind, ext, url);
        stream.height = self.height;
        stream.width = self.width;
        stream.fps = self.fps;
        stream.bitrate_kbps = self.abr.or(self.tbr).map(|kbps| kbps.round() as u32);
        stream.filesize = self
            .filesize
            .or(self.filesize_approx)
            .filter(|size| *size > 0.0)
            .map(|size| size as u64);
        stream.quality_label = self.format_note.filter(|note| !note.trim().is_empty());
        stream.http_headers = self.http_headers;
        Some(stream)
    }
}

fn best_thumbnail(info: &DumpInfo) -> Option<String> {
    info.thumbnails
        .iter()
        .filter(|thumb| thumb.width.is_some() && thumb.height.is_some())
        .max_by_key(|thumb| thumb.width.unwrap_or(0) * thumb.height.unwrap_or(0))
        .map(|thumb| thumb.url.clone())
        .or_else(|| info.thumbnail.clone())
        .or_else(|| info.thumbnails.last().map(|thumb| thumb.url.clone()))
}

fn parse_dump(raw: &[u8]) -> Result<VideoInfo, ExtractError> {
    let mut info: DumpInfo = serde_json::from_slice(raw)
        .map_err(|err| ExtractError::Failed(format!("unreadable yt-dlp output: {err}")))?;

    let thumbnail = best_thumbnail(&info);
    let formats = std::mem::take(&mut info.formats);
    let mut streams: Vec<StreamDescriptor> = if formats.is_empty() {
        std::mem::take(&mut info.direct)
            .into_descriptor("direct")
            .into_iter()
            .collect()
    } else {
        formats
            .into_iter()
            .enumerate()
            .filter_map(|(index, format)| format.into_descriptor(&format!("f{index}")))
            .collect()
    };
    streams.dedup_by(|a, b| a.format_id == b.format_id);

    Ok(VideoInfo {
        video_id: info.id,
        title: info
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| "video".to_string()),
        duration: info.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
        thumbnail,
        description: info.description,
        view_count: info.view_count,
        streams,
        backend: "yt-dlp".to_string(),
    })
}
