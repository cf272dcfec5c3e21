#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_WWW_ROOT: &str = "static";
pub const DOWNLOADS_SUBDIR: &str = "youtube_downloads";
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MAX_QUEUED: usize = 16;
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_INVIDIOUS_URL: &str = "https://inv.nadeko.net";
pub const DEFAULT_FILENAME_MAX_LEN: usize = 50;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const DEFAULT_EXTRACT_RETRIES: u32 = 2;
pub const DEFAULT_EXTRACT_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Extraction backends that can be listed in `EXTRACTOR_BACKENDS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    YtDlp,
    Invidious,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yt-dlp" | "ytdlp" | "yt_dlp" => Some(Self::YtDlp),
            "invidious" => Some(Self::Invidious),
            _ => None,
        }
    }
}

/// Fully resolved settings the server runs with.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub download_dir: PathBuf,
    pub www_root: PathBuf,
    pub max_concurrent: usize,
    pub max_queued: usize,
    pub backends: Vec<BackendKind>,
    pub ytdlp_bin: PathBuf,
    pub invidious_url: String,
    pub job_db: Option<PathBuf>,
    pub filename_max_len: usize,
    pub chunk_size: usize,
    pub user_agent: String,
    pub extract_retries: u32,
    pub extract_retry_delay: Duration,
    pub http_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            download_dir: env::temp_dir().join(DOWNLOADS_SUBDIR),
            www_root: PathBuf::from(DEFAULT_WWW_ROOT),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queued: DEFAULT_MAX_QUEUED,
            backends: vec![BackendKind::YtDlp, BackendKind::Invidious],
            ytdlp_bin: PathBuf::from(DEFAULT_YTDLP_BIN),
            invidious_url: DEFAULT_INVIDIOUS_URL.to_string(),
            job_db: None,
            filename_max_len: DEFAULT_FILENAME_MAX_LEN,
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extract_retries: DEFAULT_EXTRACT_RETRIES,
            extract_retry_delay: Duration::from_millis(DEFAULT_EXTRACT_RETRY_DELAY_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl RuntimeSettings {
    /// Default settings rooted at a specific download directory.
    pub fn with_download_dir(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub download_dir: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let defaults = RuntimeSettings::default();

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("HOST"))
        .unwrap_or(defaults.host);
    let port = overrides
        .port
        .or_else(|| parsed(lookup("PORT")))
        .unwrap_or(defaults.port);
    let download_dir = overrides
        .download_dir
        .or_else(|| lookup("DOWNLOAD_DIR").map(PathBuf::from))
        .unwrap_or(defaults.download_dir);
    let www_root = overrides
        .www_root
        .or_else(|| lookup("WWW_ROOT").map(PathBuf::from))
        .unwrap_or(defaults.www_root);

    let backends = match lookup("EXTRACTOR_BACKENDS") {
        Some(raw) => parse_backends(&raw)?,
        None => defaults.backends,
    };

    Ok(RuntimeSettings {
        host,
        port,
        download_dir,
        www_root,
        max_concurrent: parsed(lookup("MAX_CONCURRENT_DOWNLOADS"))
            .filter(|value: &usize| *value > 0)
            .unwrap_or(defaults.max_concurrent),
        max_queued: parsed(lookup("MAX_QUEUED_DOWNLOADS")).unwrap_or(defaults.max_queued),
        backends,
        ytdlp_bin: lookup("YTDLP_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.ytdlp_bin),
        invidious_url: lookup("INVIDIOUS_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or(defaults.invidious_url),
        job_db: lookup("JOB_DB").map(PathBuf::from),
        filename_max_len: parsed(lookup("FILENAME_MAX_LEN"))
            .filter(|value: &usize| *value > 0)
            .unwrap_or(defaults.filename_max_len),
        chunk_size: parsed(lookup("CHUNK_SIZE"))
            .filter(|value: &usize| *value > 0)
            .unwrap_or(defaults.chunk_size),
        user_agent: lookup("USER_AGENT").unwrap_or(defaults.user_agent),
        extract_retries: parsed(lookup("EXTRACT_RETRIES"))
            .filter(|value: &u32| *value > 0)
            .unwrap_or(defaults.extract_retries),
        extract_retry_delay: parsed(lookup("EXTRACT_RETRY_DELAY_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.extract_retry_delay),
        http_timeout: parsed(lookup("HTTP_TIMEOUT_SECS"))
            .filter(|value: &u64| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout),
    })
}

fn parse_backends(raw: &str) -> Result<Vec<BackendKind>> {
    let mut backends = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let Some(kind) = BackendKind::parse(name) else {
            bail!("unknown extractor backend in EXTRACTOR_BACKENDS: {name}");
        };
        if !backends.contains(&kind) {
            backends.push(kind);
        }
    }
    if backends.is_empty() {
        bail!("EXTRACTOR_BACKENDS must name at least one backend");
    }
    Ok(backends)
}

/// Invalid numbers fall back to the default instead of failing startup.
fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.parse::<T>().ok())
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
