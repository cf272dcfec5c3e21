//! Identifier and file name helpers: YouTube id extraction, job ids and
//! title sanitisation for files written into the download directory.

use std::sync::{
    LazyLock,
    atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use regex::Regex;

const FALLBACK_STEM: &str = "video";
const JOB_SUFFIX_LEN: usize = 12;

static VIDEO_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:youtube\.com/watch\?(?:[^#\s]*&)?v=|youtu\.be/)([^&?#\s/]+)",
        r"youtube\.com/embed/([^&?#\s/]+)",
        r"youtube\.com/v/([^&?#\s/]+)",
        r"youtube\.com/shorts/([^&?#\s/]+)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("static video id pattern"))
    .collect()
});

static DISALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("static sanitiser pattern"));
static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_-]+").expect("static separator pattern"));

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Pulls the video id out of the usual YouTube URL shapes.
pub fn extract_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    VIDEO_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
            .filter(|id| !id.is_empty())
    })
}

/// `dl_<unix seconds>_<hash>`. Uniqueness is best effort; the job store
/// overwrites silently on collision.
pub fn new_job_id(url: &str) -> String {
    let now = Utc::now();
    let counter = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(url.as_bytes());
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(&counter.to_le_bytes());
    let digest = hasher.finalize().to_hex().to_string();

    format!("dl_{}_{}", now.timestamp(), &digest[..JOB_SUFFIX_LEN])
}

/// Reduces a title to word characters joined by single underscores, capped at
/// `max_len` characters.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let stripped = DISALLOWED_CHARS.replace_all(title, "");
    let joined = SEPARATOR_RUNS.replace_all(stripped.trim(), "_");
    let truncated: String = joined.trim_matches('_').chars().take(max_len).collect();
    let trimmed = truncated.trim_end_matches('_');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn output_filename(title: &str, ext: &str, max_len: usize) -> String {
    let ext = ext.trim().trim_start_matches('.');
    let stem = sanitize_title(title, max_len);
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}
