//! Blocking HTTP copier used by the download worker. Runs inside
//! `spawn_blocking`; progress is reported through a callback after every chunk.

use std::{
    fs::File,
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{config::RuntimeSettings, extractor::StreamDescriptor};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download cancelled")]
    Cancelled,
    #[error("the video server is rate limiting downloads (HTTP 429)")]
    RateLimited,
    #[error("the video server answered HTTP {0}")]
    Status(u16),
    #[error("connection to the video server failed: {0}")]
    Transport(String),
    #[error("could not write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub downloaded: u64,
    pub total: Option<u64>,
    /// Average bytes per second since the request started.
    pub speed: Option<u64>,
    pub eta: Option<u64>,
}

impl Transfer {
    pub fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => ((self.downloaded.min(total) * 100) / total) as u8,
            _ => 0,
        }
    }

    fn measure(downloaded: u64, total: Option<u64>, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let speed = (secs > 0.0).then(|| (downloaded as f64 / secs) as u64);
        let eta = match (total, speed) {
            (Some(total), Some(speed)) if speed > 0 => {
                Some(total.saturating_sub(downloaded) / speed)
            }
            _ => None,
        };
        Self {
            downloaded,
            total,
            speed,
            eta,
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    agent: ureq::Agent,
    chunk_size: usize,
}

impl Fetcher {
    pub fn new(user_agent: &str, timeout: Duration, chunk_size: usize) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self {
            agent,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(&settings.user_agent, settings.http_timeout, settings.chunk_size)
    }

    /// Shared agent, so API lookups reuse the same connection pool.
    pub fn agent(&self) -> ureq::Agent {
        self.agent.clone()
    }

    /// Streams `stream.url` into `file`, which the caller already reserved at
    /// `dest`. The file is removed on any failure, cancellation included.
    pub fn copy_to_file(
        &self,
        stream: &StreamDescriptor,
        file: File,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: impl FnMut(Transfer),
    ) -> Result<Transfer, FetchError> {
        let result = self.copy_inner(stream, file, dest, cancel, on_progress);
        if result.is_err() && dest.exists() {
            let _ = std::fs::remove_file(dest);
        }
        result
    }

    fn copy_inner(
        &self,
        stream: &StreamDescriptor,
        mut file: File,
        dest: &Path,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(Transfer),
    ) -> Result<Transfer, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let mut request = self.agent.get(&stream.url);
        for (name, value) in &stream.http_headers {
            request = request.set(name, value);
        }
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(429, _)) => return Err(FetchError::RateLimited),
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport(transport.to_string()));
            }
        };

        let total = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .or(stream.filesize);
        debug!(url = %stream.url, ?total, dest = %dest.display(), "copy started");

        let io_err = |source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut reader = response.into_reader();
        let mut buffer = vec![0u8; self.chunk_size];
        let started = Instant::now();
        let mut downloaded = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FetchError::Transport(err.to_string())),
            };
            file.write_all(&buffer[..read]).map_err(io_err)?;
            downloaded += read as u64;
            on_progress(Transfer::measure(downloaded, total, started.elapsed()));
        }

        file.sync_all().map_err(io_err)?;
        Ok(Transfer::measure(downloaded, total, started.elapsed()))
    }
}
