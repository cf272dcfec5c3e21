use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ExtractError, Extractor, StreamDescriptor, StreamKind, VideoInfo, parse_height};
use crate::naming::extract_video_id;

/// Queries an Invidious instance's `/api/v1/videos/{id}` endpoint.
pub struct InvidiousExtractor {
    instance: String,
    agent: ureq::Agent,
}

impl InvidiousExtractor {
    pub fn new(instance: impl Into<String>, agent: ureq::Agent) -> Self {
        let instance = instance.into().trim_end_matches('/').to_string();
        Self { instance, agent }
    }

    fn endpoint(&self, video_id: &str) -> String {
        format!("{}/api/v1/videos/{video_id}", self.instance)
    }
}

#[async_trait]
impl Extractor for InvidiousExtractor {
    fn name(&self) -> &str {
        "invidious"
    }

    async fn resolve(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        let video_id = extract_video_id(url).ok_or(ExtractError::InvalidUrl)?;
        let endpoint = self.endpoint(&video_id);
        let agent = self.agent.clone();

        let video = tokio::task::spawn_blocking(move || fetch_video(&agent, &endpoint))
            .await
            .map_err(|err| ExtractError::Failed(format!("invidious task failed: {err}")))??;

        Ok(map_video(video, &video_id, &self.instance))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

fn fetch_video(agent: &ureq::Agent, endpoint: &str) -> Result<InvidiousVideo, ExtractError> {
    debug!(endpoint, "querying invidious");
    match agent.get(endpoint).call() {
        Ok(response) => response
            .into_json::<InvidiousVideo>()
            .map_err(|err| ExtractError::Failed(format!("unreadable invidious response: {err}"))),
        Err(ureq::Error::Status(429, _)) => Err(ExtractError::RateLimited),
        Err(ureq::Error::Status(code, response)) => {
            let message = response
                .into_json::<ErrorBody>()
                .map(|body| body.error)
                .unwrap_or_else(|_| format!("invidious returned HTTP {code}"));
            match ExtractError::classify(&message) {
                ExtractError::Failed(_) if code == 404 => Err(ExtractError::Unavailable),
                classified => Err(classified),
            }
        }
        Err(ureq::Error::Transport(transport)) => Err(ExtractError::Failed(format!(
            "invidious unreachable: {transport}"
        ))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousVideo {
    title: String,
    #[serde(default)]
    length_seconds: Option<u64>,
    description: Option<String>,
    view_count: Option<u64>,
    #[serde(default)]
    video_thumbnails: Vec<InvidiousThumbnail>,
    #[serde(default)]
    format_streams: Vec<InvidiousStream>,
    #[serde(default)]
    adaptive_formats: Vec<InvidiousStream>,
}

#[derive(Deserialize)]
struct InvidiousThumbnail {
    url: String,
    width: Option<u64>,
    height: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousStream {
    url: String,
    itag: String,
    #[serde(rename = "type")]
    mime_type: String,
    container: Option<String>,
    resolution: Option<String>,
    quality_label: Option<String>,
    bitrate: Option<String>,
    clen: Option<String>,
    size: Option<String>,
    fps: Option<f64>,
}

impl InvidiousStream {
    fn into_descriptor(self, kind: StreamKind) -> StreamDescriptor {
        let ext = self
            .container
            .clone()
            .filter(|container| !container.is_empty())
            .unwrap_or_else(|| ext_from_mime(&self.mime_type));
        let label = self
            .quality_label
            .clone()
            .or_else(|| self.resolution.clone())
            .filter(|label| !label.is_empty());
        let (width, height) = match self.size.as_deref().and_then(|size| size.split_once('x')) {
            Some((w, h)) => (w.parse().ok(), h.parse().ok()),
            None => (None, label.as_deref().and_then(parse_height)),
        };

        let mut stream = StreamDescriptor::new(self.itag, kind, ext, self.url);
        stream.width = width;
        stream.height = if kind.has_video() { height } else { None };
        stream.fps = self.fps.filter(|fps| *fps > 0.0);
        stream.bitrate_kbps = self
            .bitrate
            .as_deref()
            .and_then(|bps| bps.parse::<u64>().ok())
            .map(|bps| (bps / 1000) as u32);
        stream.filesize = self.clen.as_deref().and_then(|len| len.parse().ok());
        stream.quality_label = if kind.has_video() { label } else { None };
        stream
    }
}

fn ext_from_mime(mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence {
        "audio/mp4" => "m4a".to_string(),
        other => other
            .split_once('/')
            .map(|(_, subtype)| subtype.to_string())
            .filter(|subtype| !subtype.is_empty())
            .unwrap_or_else(|| "mp4".to_string()),
    }
}

fn absolutize(instance: &str, url: String) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else if url.starts_with('/') {
        format!("{instance}{url}")
    } else {
        url
    }
}

fn map_video(video: InvidiousVideo, video_id: &str, instance: &str) -> VideoInfo {
    let thumbnail = video
        .video_thumbnails
        .iter()
        .max_by_key(|thumb| thumb.width.unwrap_or(0) * thumb.height.unwrap_or(0))
        .map(|thumb| absolutize(instance, thumb.url.clone()));

    let muxed = video
        .format_streams
        .into_iter()
        .map(|stream| stream.into_descriptor(StreamKind::Muxed));
    let adaptive = video.adaptive_formats.into_iter().map(|stream| {
        let kind = if stream.mime_type.starts_with("audio/") {
            StreamKind::AudioOnly
        } else {
            StreamKind::VideoOnly
        };
        stream.into_descriptor(kind)
    });
    let streams = muxed
        .chain(adaptive)
        .map(|mut stream| {
            stream.url = absolutize(instance, stream.url);
            stream
        })
        .collect();

    VideoInfo {
        video_id: Some(video_id.to_string()),
        title: video.title,
        duration: video.length_seconds,
        thumbnail,
        description: video.description,
        view_count: video.view_count,
        streams,
        backend: "invidious".to_string(),
    }
}
