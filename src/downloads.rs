//! Download manager: accepts jobs, runs them on a bounded pool of background
//! workers and hands finished files to the HTTP responder.
//!
//! Each job is owned by exactly one spawned task, which is the only writer of
//! that job's tracker record. Cancellation flips the job's token and drops the
//! record; the worker notices at the next chunk and never writes again.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::RuntimeSettings,
    extractor::{ExtractError, Extractor, StreamDescriptor},
    fetch::{FetchError, Fetcher, Transfer},
    formats::{FormatSelector, RequestedKind, select_stream},
    jobs::{JobRecord, JobStatus, JobStore},
    naming::{new_job_id, output_filename},
    security::is_plain_file_name,
};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("A video URL is required")]
    MissingUrl,
    #[error("The server is busy ({0} downloads running or queued); try again shortly")]
    Busy(usize),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Download not completed")]
    NotReady,
    #[error("Download not found")]
    NotFound,
    #[error("The downloaded file no longer exists")]
    Missing,
    #[error("The downloaded file is empty")]
    Empty,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct StartedDownload {
    pub job_id: String,
    pub format_type: RequestedKind,
}

/// A completed download that passed every check and can be streamed.
#[derive(Debug, Clone)]
pub struct ReadyFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queued: usize,
}

#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<DownloadManagerInner>,
}

struct DownloadManagerInner {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    fetcher: Fetcher,
    download_dir: PathBuf,
    filename_max_len: usize,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    max_queued: usize,
    /// Jobs accepted but not finished, running ones included.
    pending: AtomicUsize,
    running: AtomicUsize,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

/// Decrements a counter when the owning task ends, however it ends.
struct CounterGuard<'a>(&'a AtomicUsize);

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DownloadManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        fetcher: Fetcher,
        settings: &RuntimeSettings,
    ) -> Self {
        let max_concurrent = settings.max_concurrent.max(1);
        Self {
            inner: Arc::new(DownloadManagerInner {
                store,
                extractor,
                fetcher,
                download_dir: settings.download_dir.clone(),
                filename_max_len: settings.filename_max_len,
                slots: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                max_queued: settings.max_queued,
                pending: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.inner.extractor
    }

    /// Registers a job and spawns its worker. Returns as soon as the job is
    /// tracked; the download itself happens in the background.
    pub async fn start(&self, url: &str, format_id: &str) -> Result<StartedDownload, StartError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StartError::MissingUrl);
        }

        let capacity = self.inner.max_concurrent + self.inner.max_queued;
        let reserved = self
            .inner
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                (pending < capacity).then_some(pending + 1)
            });
        if reserved.is_err() {
            warn!(capacity, "rejecting download, queue is full");
            return Err(StartError::Busy(capacity));
        }

        let job_id = new_job_id(url);
        if let Err(err) = self.inner.store.create(&job_id).await {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(err.into());
        }

        let token = CancellationToken::new();
        self.inner
            .tokens
            .lock()
            .insert(job_id.clone(), token.clone());

        let selector = FormatSelector::parse(format_id);
        let format_type = selector.requested_kind();
        info!(%job_id, url, format_id, "download queued");

        let inner = self.inner.clone();
        let worker_job = job_id.clone();
        let worker_url = url.to_owned();
        tokio::spawn(async move {
            run_job(inner, worker_job, worker_url, selector, token).await;
        });

        Ok(StartedDownload {
            job_id,
            format_type,
        })
    }

    /// Stops the worker (if any) and forgets the job. Returns whether a
    /// record existed.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let token = self.inner.tokens.lock().remove(job_id);
        if let Some(token) = token {
            token.cancel();
            info!(job_id, "download cancelled");
        }
        self.inner.store.delete(job_id).await
    }

    pub async fn progress(&self, job_id: &str) -> Result<JobRecord> {
        self.inner.store.read(job_id).await
    }

    pub async fn prepare_file(&self, job_id: &str) -> Result<ReadyFile, ServeError> {
        let record = self.inner.store.read(job_id).await?;
        match record.status {
            JobStatus::Completed => {}
            JobStatus::Unknown => return Err(ServeError::NotFound),
            _ => return Err(ServeError::NotReady),
        }

        let filename = record
            .filename
            .filter(|name| !name.is_empty())
            .ok_or(ServeError::NotFound)?;
        if !is_plain_file_name(&filename) {
            warn!(job_id, filename, "refusing to serve unsafe file name");
            return Err(ServeError::NotFound);
        }

        let path = self.inner.download_dir.join(&filename);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ServeError::Missing)?;
        if !metadata.is_file() {
            return Err(ServeError::Missing);
        }
        if metadata.len() == 0 {
            return Err(ServeError::Empty);
        }

        Ok(ReadyFile {
            path,
            filename,
            size: metadata.len(),
        })
    }

    /// Drops the tracker entry once the file response has been built. The file
    /// stays on disk.
    pub async fn finish_serving(&self, job_id: &str) -> Result<()> {
        self.inner.store.delete(job_id).await?;
        debug!(job_id, "download handed to client");
        Ok(())
    }

    pub fn stats(&self) -> DownloadStats {
        let pending = self.inner.pending.load(Ordering::SeqCst);
        let active = self.inner.running.load(Ordering::SeqCst);
        DownloadStats {
            active,
            queued: pending.saturating_sub(active),
            max_concurrent: self.inner.max_concurrent,
            max_queued: self.inner.max_queued,
        }
    }
}

#[derive(Debug, Error)]
enum WorkerError {
    #[error("download cancelled")]
    Cancelled,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("Download failed: {0}")]
    Fetch(FetchError),
    #[error("The downloaded file is empty")]
    EmptyFile,
    #[error("Could not prepare the download folder: {0}")]
    Io(#[from] std::io::Error),
    #[error("Download task stopped unexpectedly: {0}")]
    Crashed(String),
}

impl From<FetchError> for WorkerError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Self::Cancelled,
            FetchError::RateLimited => Self::Extract(ExtractError::RateLimited),
            other => Self::Fetch(other),
        }
    }
}

async fn run_job(
    inner: Arc<DownloadManagerInner>,
    job_id: String,
    url: String,
    selector: FormatSelector,
    token: CancellationToken,
) {
    let _pending = CounterGuard(&inner.pending);

    let permit = tokio::select! {
        permit = inner.slots.clone().acquire_owned() => permit,
        _ = token.cancelled() => {
            debug!(%job_id, "cancelled while queued");
            forget_token(&inner, &job_id);
            return;
        }
    };
    let Ok(_permit) = permit else {
        return;
    };
    inner.running.fetch_add(1, Ordering::SeqCst);
    let _running = CounterGuard(&inner.running);

    let worker = Worker {
        inner: &inner,
        job_id: &job_id,
        token: &token,
    };
    match worker.run(&url, &selector).await {
        Ok(filename) => info!(%job_id, filename, "download completed"),
        Err(WorkerError::Cancelled) => debug!(%job_id, "worker stopped after cancel"),
        Err(err) => {
            warn!(%job_id, error = %err, "download failed");
            worker.publish(JobRecord::failed(err.to_string())).await;
        }
    }
    forget_token(&inner, &job_id);
}

fn forget_token(inner: &DownloadManagerInner, job_id: &str) {
    inner.tokens.lock().remove(job_id);
}

struct Worker<'a> {
    inner: &'a DownloadManagerInner,
    job_id: &'a str,
    token: &'a CancellationToken,
}

impl Worker<'_> {
    async fn run(&self, url: &str, selector: &FormatSelector) -> Result<String, WorkerError> {
        let info = tokio::select! {
            info = self.inner.extractor.resolve(url) => info?,
            _ = self.token.cancelled() => return Err(WorkerError::Cancelled),
        };
        let stream = select_stream(&info.streams, selector)?.clone();
        debug!(
            job_id = self.job_id,
            backend = %info.backend,
            format_id = %stream.format_id,
            "stream selected"
        );

        tokio::fs::create_dir_all(&self.inner.download_dir).await?;
        let (filename, path, file) = self.reserve_output(&info.title, &stream.ext)?;

        self.publish(JobRecord::new(JobStatus::Downloading, 0).with_title(&info.title))
            .await;
        let transfer = self.copy(stream, file, path.clone(), &info.title).await?;

        self.publish(
            JobRecord::new(JobStatus::Processing, 100)
                .with_title(&info.title)
                .with_transfer(transfer.downloaded, transfer.total, transfer.speed, Some(0)),
        )
        .await;

        let size = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if size == 0 {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(WorkerError::EmptyFile);
        }
        if self.token.is_cancelled() {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(WorkerError::Cancelled);
        }

        self.publish(JobRecord::completed(&filename, &info.title))
            .await;
        Ok(filename)
    }

    /// Creates the output file under a name no other job holds. The title-based
    /// name is claimed with `create_new`; if another job got there first the
    /// job-id hash is appended.
    fn reserve_output(
        &self,
        title: &str,
        ext: &str,
    ) -> Result<(String, PathBuf, File), WorkerError> {
        let filename = output_filename(title, ext, self.inner.filename_max_len);
        let path = self.inner.download_dir.join(&filename);
        match create_exclusive(&path) {
            Ok(file) => return Ok((filename, path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }

        let suffix = self.job_id.rsplit('_').next().unwrap_or(self.job_id);
        let filename = match filename.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}_{suffix}.{ext}"),
            None => format!("{filename}_{suffix}"),
        };
        let path = self.inner.download_dir.join(&filename);
        let file = create_exclusive(&path)?;
        Ok((filename, path, file))
    }

    async fn copy(
        &self,
        stream: StreamDescriptor,
        file: File,
        path: PathBuf,
        title: &str,
    ) -> Result<Transfer, WorkerError> {
        let (progress_tx, mut progress_rx) = watch::channel(Transfer::default());
        let fetcher = self.inner.fetcher.clone();
        let token = self.token.clone();
        let dest = path.clone();
        let mut copy = tokio::task::spawn_blocking(move || {
            fetcher.copy_to_file(&stream, file, &dest, &token, |transfer| {
                let _ = progress_tx.send(transfer);
            })
        });

        let mut watching = true;
        loop {
            tokio::select! {
                joined = &mut copy => {
                    return match joined {
                        Ok(result) => result.map_err(WorkerError::from),
                        Err(err) => {
                            let _ = tokio::fs::remove_file(&path).await;
                            Err(WorkerError::Crashed(err.to_string()))
                        }
                    };
                }
                changed = progress_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let transfer = *progress_rx.borrow_and_update();
                    self.publish(
                        JobRecord::new(JobStatus::Downloading, transfer.percent())
                            .with_title(title)
                            .with_transfer(
                                transfer.downloaded,
                                transfer.total,
                                transfer.speed,
                                transfer.eta,
                            ),
                    )
                    .await;
                }
            }
        }
    }

    /// Writes the job's record unless it was cancelled. A cancel that lands
    /// between the check and the write is undone right after.
    async fn publish(&self, record: JobRecord) {
        if self.token.is_cancelled() {
            return;
        }
        if let Err(err) = self.inner.store.update(self.job_id, record).await {
            warn!(job_id = self.job_id, error = %err, "failed to record job progress");
        }
        if self.token.is_cancelled() {
            let _ = self.inner.store.delete(self.job_id).await;
        }
    }
}

fn create_exclusive(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extractor::{
            StreamKind, VideoInfo,
            testing::{StaticExtractor, sample_info},
        },
        jobs::MemoryJobStore,
    };
    use async_trait::async_trait;
    use axum::{Router, body::Body, routing::get};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_util::io::ReaderStream;
    use tempfile::{TempDir, tempdir};

    /// Holds every resolve call until the gate is opened.
    struct GatedExtractor {
        gate: watch::Receiver<bool>,
        info: VideoInfo,
    }

    #[async_trait]
    impl Extractor for GatedExtractor {
        fn name(&self) -> &str {
            "gated"
        }

        async fn resolve(&self, _url: &str) -> Result<VideoInfo, ExtractError> {
            let mut gate = self.gate.clone();
            let _ = gate.wait_for(|open| *open).await;
            Ok(self.info.clone())
        }
    }

    /// Sends 512-byte chunks every 20ms until the client goes away.
    fn trickle_body() -> Body {
        let (reader, mut writer) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            for _ in 0..500 {
                if writer.write_all(&[2u8; 512]).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        Body::from_stream(ReaderStream::new(reader))
    }

    async fn spawn_media_server() -> String {
        let router = Router::new()
            .route("/clip.mp4", get(|| async { vec![1u8; 4096] }))
            .route("/empty.mp4", get(|| async { Vec::<u8>::new() }))
            .route(
                "/delayed.mp4",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    vec![1u8; 4096]
                }),
            )
            .route("/trickle.mp4", get(|| async { trickle_body() }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn stream_at(base: &str, path: &str) -> StreamDescriptor {
        let url = format!("{base}/{path}");
        let mut stream = StreamDescriptor::new("18", StreamKind::Muxed, "mp4", url);
        stream.height = Some(360);
        stream
    }

    fn manager_with(
        extractor: Arc<dyn Extractor>,
        max_concurrent: usize,
        max_queued: usize,
    ) -> (TempDir, DownloadManager) {
        let dir = tempdir().unwrap();
        let settings = RuntimeSettings {
            max_concurrent,
            max_queued,
            chunk_size: 512,
            ..RuntimeSettings::with_download_dir(dir.path().join("downloads"))
        };
        let manager = DownloadManager::new(
            Arc::new(MemoryJobStore::new()),
            extractor,
            Fetcher::from_settings(&settings),
            &settings,
        );
        (dir, manager)
    }

    async fn wait_for_status(
        manager: &DownloadManager,
        job_id: &str,
        status: JobStatus,
    ) -> JobRecord {
        for _ in 0..200 {
            let record = manager.progress(job_id).await.unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} never reached {status:?}");
    }

    fn serving(base: &str, path: &str) -> Arc<StaticExtractor> {
        Arc::new(StaticExtractor::ok(sample_info(vec![stream_at(base, path)])))
    }

    async fn wait_until_idle(manager: &DownloadManager) {
        for _ in 0..200 {
            let stats = manager.stats();
            if stats.active == 0 && stats.queued == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("workers never finished");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completes_download_and_serves_once() {
        let base = spawn_media_server().await;
        let extractor = serving(&base, "clip.mp4");
        let (_dir, manager) = manager_with(extractor, 2, 2);

        let started = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        assert_eq!(started.format_type, RequestedKind::Video);
        assert!(started.job_id.starts_with("dl_"));

        let record = wait_for_status(&manager, &started.job_id, JobStatus::Completed).await;
        assert_eq!(record.progress, 100);
        assert_eq!(record.filename.as_deref(), Some("Sample_A_Video_Title.mp4"));
        assert_eq!(record.title.as_deref(), Some("Sample: A Video -- Title!"));

        let ready = manager.prepare_file(&started.job_id).await.unwrap();
        assert_eq!(ready.size, 4096);
        manager.finish_serving(&started.job_id).await.unwrap();

        assert!(ready.path.exists(), "served files stay on disk");
        assert!(matches!(
            manager.prepare_file(&started.job_id).await,
            Err(ServeError::NotFound)
        ));
        assert_eq!(
            manager.progress(&started.job_id).await.unwrap(),
            JobRecord::unknown()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_job_with_same_title_gets_suffixed_name() {
        let base = spawn_media_server().await;
        let extractor = serving(&base, "clip.mp4");
        let (_dir, manager) = manager_with(extractor, 1, 4);

        let first = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        wait_for_status(&manager, &first.job_id, JobStatus::Completed).await;
        let second = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        let record = wait_for_status(&manager, &second.job_id, JobStatus::Completed).await;

        let suffix = second.job_id.rsplit('_').next().unwrap();
        assert_eq!(
            record.filename,
            Some(format!("Sample_A_Video_Title_{suffix}.mp4"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_jobs_with_same_title_write_separate_files() {
        let base = spawn_media_server().await;
        let (dir, manager) = manager_with(serving(&base, "delayed.mp4"), 2, 0);

        let first = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        let second = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        let mut names = Vec::new();
        for job in [&first, &second] {
            let record = wait_for_status(&manager, &job.job_id, JobStatus::Completed).await;
            names.push(record.filename.unwrap());
        }

        assert_ne!(names[0], names[1]);
        assert!(names.iter().any(|name| name == "Sample_A_Video_Title.mp4"));
        for name in &names {
            let bytes = std::fs::read(dir.path().join("downloads").join(name)).unwrap();
            assert_eq!(bytes.len(), 4096, "{name} was overwritten or truncated");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_during_copy_removes_record_and_partial_file() {
        let base = spawn_media_server().await;
        let (dir, manager) = manager_with(serving(&base, "trickle.mp4"), 1, 0);

        let started = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        for _ in 0..200 {
            let record = manager.progress(&started.job_id).await.unwrap();
            if record.downloaded.is_some_and(|bytes| bytes > 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.cancel(&started.job_id).await.unwrap());
        wait_until_idle(&manager).await;

        assert_eq!(
            manager.progress(&started.job_id).await.unwrap(),
            JobRecord::unknown()
        );
        assert_eq!(manager.store().len().await.unwrap(), 0);
        let left: Vec<_> = std::fs::read_dir(dir.path().join("downloads"))
            .unwrap()
            .collect();
        assert!(left.is_empty(), "partial file left behind: {left:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn extractor_failures_become_error_records() {
        let extractor = Arc::new(StaticExtractor::failing("static", ExtractError::Private));
        let (_dir, manager) = manager_with(extractor, 1, 1);

        let started = manager.start("https://youtu.be/abc123", "audio_best").await.unwrap();
        assert_eq!(started.format_type, RequestedKind::Audio);

        let record = wait_for_status(&manager, &started.job_id, JobStatus::Error).await;
        assert_eq!(record.progress, 0);
        assert_eq!(record.error.as_deref(), Some("This video is private"));
        assert!(matches!(
            manager.prepare_file(&started.job_id).await,
            Err(ServeError::NotReady)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_downloads_fail_and_leave_no_file() {
        let base = spawn_media_server().await;
        let extractor = serving(&base, "empty.mp4");
        let (dir, manager) = manager_with(extractor, 1, 1);

        let started = manager.start("https://youtu.be/abc123", "best").await.unwrap();
        let record = wait_for_status(&manager, &started.job_id, JobStatus::Error).await;
        assert_eq!(record.error.as_deref(), Some("The downloaded file is empty"));
        assert!(!dir.path().join("downloads/Sample_A_Video_Title.mp4").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_when_queue_is_full_and_recovers() {
        let (gate_tx, gate_rx) = watch::channel(false);
        let extractor = Arc::new(GatedExtractor {
            gate: gate_rx,
            info: sample_info(vec![]),
        });
        let (_dir, manager) = manager_with(extractor, 1, 1);

        let first = manager.start("https://youtu.be/a", "best").await.unwrap();
        let second = manager.start("https://youtu.be/b", "best").await.unwrap();
        assert!(matches!(
            manager.start("https://youtu.be/c", "best").await,
            Err(StartError::Busy(2))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = manager.stats();
        assert_eq!((stats.active, stats.queued), (1, 1));

        gate_tx.send(true).unwrap();
        // Both resolve to zero streams.
        for job in [&first, &second] {
            let record = wait_for_status(&manager, &job.job_id, JobStatus::Error).await;
            assert_eq!(record.error, Some(ExtractError::NoStreams.to_string()));
        }
        wait_until_idle(&manager).await;
        assert!(manager.start("https://youtu.be/d", "best").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_while_queued_or_resolving_never_recreates_record() {
        let (_gate_tx, gate_rx) = watch::channel(false);
        let extractor = Arc::new(GatedExtractor {
            gate: gate_rx,
            info: sample_info(vec![]),
        });
        let (_dir, manager) = manager_with(extractor, 1, 2);

        let resolving = manager.start("https://youtu.be/a", "best").await.unwrap();
        let queued = manager.start("https://youtu.be/b", "best").await.unwrap();

        assert!(manager.cancel(&queued.job_id).await.unwrap());
        assert!(manager.cancel(&resolving.job_id).await.unwrap());
        assert!(!manager.cancel(&resolving.job_id).await.unwrap());

        wait_until_idle(&manager).await;
        for job in [&resolving, &queued] {
            assert_eq!(
                manager.progress(&job.job_id).await.unwrap(),
                JobRecord::unknown()
            );
        }
        assert_eq!(manager.store().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn start_requires_url() {
        let extractor = Arc::new(StaticExtractor::ok(sample_info(vec![])));
        let (_dir, manager) = manager_with(extractor, 1, 0);
        assert!(matches!(
            manager.start("   ", "best").await,
            Err(StartError::MissingUrl)
        ));
        assert_eq!(manager.stats().queued, 0);
    }

    #[tokio::test]
    async fn prepare_file_checks_disk_state() {
        let extractor = Arc::new(StaticExtractor::ok(sample_info(vec![])));
        let (dir, manager) = manager_with(extractor, 1, 0);
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        let store = manager.store();

        store
            .update("missing", JobRecord::completed("gone.mp4", "Gone"))
            .await
            .unwrap();
        assert!(matches!(
            manager.prepare_file("missing").await,
            Err(ServeError::Missing)
        ));

        std::fs::write(downloads.join("empty.mp4"), b"").unwrap();
        store
            .update("empty", JobRecord::completed("empty.mp4", "Empty"))
            .await
            .unwrap();
        assert!(matches!(
            manager.prepare_file("empty").await,
            Err(ServeError::Empty)
        ));

        store
            .update("escape", JobRecord::completed("../secret.txt", "Nope"))
            .await
            .unwrap();
        assert!(matches!(
            manager.prepare_file("escape").await,
            Err(ServeError::NotFound)
        ));

        store
            .update("nameless", JobRecord::new(JobStatus::Completed, 100))
            .await
            .unwrap();
        assert!(matches!(
            manager.prepare_file("nameless").await,
            Err(ServeError::NotFound)
        ));

        store.create("running").await.unwrap();
        assert!(matches!(
            manager.prepare_file("running").await,
            Err(ServeError::NotReady)
        ));
    }
}
