//! Downloads, uploads and server-to-server relays against the clipboard
//! content endpoint.
//!
//! Every request is bounded by the engine timeout and attempted exactly once.
//! Progress goes to a caller-supplied [`ProgressSink`] as a fraction in
//! `0.0..=1.0`, and only when the total size is known.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use clipbridge_core::MAX_CLIPBOARD_BYTES;
use futures::{StreamExt, stream};
use reqwest::{
    Body, Client,
    multipart::{Form, Part},
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ClipboardError;

pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(20);
pub const UPLOAD_CHUNK_BYTES: usize = 16 * 1024;
pub const UPLOAD_FILE_NAME: &str = "clipboard";

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, fraction: f64) {
        self(fraction)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _fraction: f64) {}
}

pub type SharedProgress = Arc<dyn ProgressSink>;

pub fn no_progress() -> SharedProgress {
    Arc::new(NoProgress)
}

/// Slice of the overall progress range one leg of a transfer reports into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub const FULL: Self = Self { start: 0.0, end: 1.0 };
    pub const FIRST_HALF: Self = Self { start: 0.0, end: 0.5 };
    pub const SECOND_HALF: Self = Self { start: 0.5, end: 1.0 };

    pub fn map(self, done: u64, total: u64) -> f64 {
        let ratio = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        self.start + (self.end - self.start) * ratio
    }
}

/// Multipart field carrying the upload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadField {
    /// A payload blob the endpoint decodes and validates.
    File,
    /// Opaque bytes relayed from another endpoint.
    Data,
}

impl UploadField {
    pub fn name(self) -> &'static str {
        match self {
            UploadField::File => "file",
            UploadField::Data => "data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Download,
    Upload,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    InFlight,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferJob {
    pub id: u64,
    pub direction: TransferDirection,
    pub source_url: String,
    pub dest_url: Option<String>,
    pub progress: f64,
    pub state: TransferState,
}

#[derive(Debug, Default)]
struct JobRegistry {
    started: AtomicU64,
    jobs: Mutex<HashMap<u64, TransferJob>>,
}

impl JobRegistry {
    // The map stays consistent across a panic, so a poisoned lock is reused.
    fn jobs(&self) -> MutexGuard<'_, HashMap<u64, TransferJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            warn!("transfer job registry lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn open(&self, direction: TransferDirection, source_url: &str, dest_url: Option<&str>) -> u64 {
        let id = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(job = id, ?direction, source_url, dest_url, "transfer job created");
        self.jobs().insert(
            id,
            TransferJob {
                id,
                direction,
                source_url: source_url.to_owned(),
                dest_url: dest_url.map(str::to_owned),
                progress: 0.0,
                state: TransferState::Pending,
            },
        );
        id
    }

    fn start(&self, id: u64) {
        if let Some(job) = self.jobs().get_mut(&id) {
            job.state = TransferState::InFlight;
        }
    }

    fn progress(&self, id: u64, fraction: f64) {
        if let Some(job) = self.jobs().get_mut(&id) {
            job.progress = fraction;
        }
    }

    fn finish<T>(&self, id: u64, result: &Result<T, ClipboardError>) {
        let Some(mut job) = self.jobs().remove(&id) else {
            return;
        };
        match result {
            Ok(_) => {
                job.state = TransferState::Complete;
                debug!(job = id, direction = ?job.direction, "transfer job complete");
            }
            Err(err) => {
                job.state = TransferState::Failed;
                warn!(
                    job = id,
                    direction = ?job.direction,
                    source_url = %job.source_url,
                    progress = job.progress,
                    "transfer job failed: {err}"
                );
            }
        }
    }

    fn snapshot(&self) -> Vec<TransferJob> {
        let mut jobs = self.jobs().values().cloned().collect::<Vec<_>>();
        jobs.sort_by_key(|job| job.id);
        jobs
    }
}

#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: Client,
    timeout: Duration,
    registry: Arc<JobRegistry>,
}

impl TransferEngine {
    pub fn new() -> Result<Self, ClipboardError> {
        Self::with_timeout(TRANSFER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ClipboardError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ClipboardError::Runtime(format!("http client init failed: {err}")))?;
        Ok(Self {
            client,
            timeout,
            registry: Arc::new(JobRegistry::default()),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of transfer jobs ever started by this engine (and its clones).
    pub fn jobs_started(&self) -> u64 {
        self.registry.started.load(Ordering::Relaxed)
    }

    /// Jobs still pending or in flight, oldest first.
    pub fn active_jobs(&self) -> Vec<TransferJob> {
        self.registry.snapshot()
    }

    pub async fn download(
        &self,
        url: &str,
        progress: SharedProgress,
    ) -> Result<Bytes, ClipboardError> {
        let job = self.registry.open(TransferDirection::Download, url, None);
        let result = self.fetch(job, url, &progress, ProgressRange::FULL).await;
        self.registry.finish(job, &result);
        result
    }

    pub async fn upload(
        &self,
        url: &str,
        field: UploadField,
        body: Bytes,
        progress: SharedProgress,
    ) -> Result<(), ClipboardError> {
        let job = self.registry.open(TransferDirection::Upload, url, None);
        let result = self
            .send(job, url, field, body, progress, ProgressRange::FULL)
            .await;
        self.registry.finish(job, &result);
        result
    }

    /// Moves clipboard content from one endpoint to another: download from
    /// `source_url`, then upload the bytes untouched to `dest_url`.
    pub async fn relay(
        &self,
        source_url: &str,
        dest_url: &str,
        progress: SharedProgress,
    ) -> Result<(), ClipboardError> {
        let job = self
            .registry
            .open(TransferDirection::Relay, source_url, Some(dest_url));
        let result = async {
            let data = self
                .fetch(job, source_url, &progress, ProgressRange::FIRST_HALF)
                .await?;
            info!(source_url, size = data.len(), "relay download done");
            self.send(
                job,
                dest_url,
                UploadField::Data,
                data,
                progress,
                ProgressRange::SECOND_HALF,
            )
            .await
        }
        .await;
        self.registry.finish(job, &result);
        result
    }

    async fn fetch(
        &self,
        job: u64,
        url: &str,
        progress: &SharedProgress,
        range: ProgressRange,
    ) -> Result<Bytes, ClipboardError> {
        self.registry.start(job);
        let request = async {
            let mut response = self.client.get(url).send().await?.error_for_status()?;
            let total = response.content_length().filter(|len| *len > 0);
            let capacity = total.unwrap_or(0).min(MAX_CLIPBOARD_BYTES as u64) as usize;
            let mut body = BytesMut::with_capacity(capacity);

            while let Some(chunk) = response.chunk().await? {
                body.extend_from_slice(&chunk);
                if body.len() > MAX_CLIPBOARD_BYTES {
                    return Err(ClipboardError::Transport(format!(
                        "clipboard content exceeds {MAX_CLIPBOARD_BYTES} bytes"
                    )));
                }
                if let Some(total) = total {
                    let fraction = range.map(body.len() as u64, total);
                    self.registry.progress(job, fraction);
                    progress.on_progress(fraction);
                }
            }
            Ok(body.freeze())
        };
        self.bounded(request).await
    }

    async fn send(
        &self,
        job: u64,
        url: &str,
        field: UploadField,
        body: Bytes,
        progress: SharedProgress,
        range: ProgressRange,
    ) -> Result<(), ClipboardError> {
        self.registry.start(job);
        let total = body.len() as u64;
        let registry = Arc::clone(&self.registry);
        let mut sent = 0u64;
        let chunks = stream::iter(split_chunks(&body, UPLOAD_CHUNK_BYTES)).map(move |chunk| {
            sent += chunk.len() as u64;
            let fraction = range.map(sent, total);
            registry.progress(job, fraction);
            progress.on_progress(fraction);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(chunks), total)
            .file_name(UPLOAD_FILE_NAME);
        let form = Form::new().part(field.name(), part);

        let request = async {
            self.client
                .post(url)
                .multipart(form)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        };
        self.bounded(request).await
    }

    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, ClipboardError>>,
    ) -> Result<T, ClipboardError> {
        match timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ClipboardError::Timeout(self.timeout)),
        }
    }
}

fn split_chunks(body: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..body.len())
        .step_by(chunk_size)
        .map(|start| body.slice(start..(start + chunk_size).min(body.len())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_halves_split_the_progress_range() {
        assert_eq!(ProgressRange::FIRST_HALF.map(0, 10), 0.0);
        assert_eq!(ProgressRange::FIRST_HALF.map(10, 10), 0.5);
        assert_eq!(ProgressRange::SECOND_HALF.map(5, 10), 0.75);
        assert_eq!(ProgressRange::SECOND_HALF.map(10, 10), 1.0);
        assert_eq!(ProgressRange::FULL.map(20, 10), 1.0);
    }

    #[test]
    fn chunks_cover_body_in_order() {
        let body = Bytes::from(vec![7_u8; UPLOAD_CHUNK_BYTES * 2 + 5]);
        let chunks = split_chunks(&body, UPLOAD_CHUNK_BYTES);
        assert_eq!(
            chunks.iter().map(Bytes::len).collect::<Vec<_>>(),
            vec![UPLOAD_CHUNK_BYTES, UPLOAD_CHUNK_BYTES, 5]
        );
        assert!(split_chunks(&Bytes::new(), UPLOAD_CHUNK_BYTES).is_empty());
    }

    #[test]
    fn poisoned_registry_keeps_tracking_jobs() {
        let registry = Arc::new(JobRegistry::default());
        let first = registry.open(TransferDirection::Download, "http://a/clipboard", None);

        let holder = Arc::clone(&registry);
        let outcome = std::thread::spawn(move || {
            let _guard = holder.jobs.lock().expect("registry lock");
            panic!("poison the registry");
        })
        .join();
        assert!(outcome.is_err());
        assert!(registry.jobs.is_poisoned());

        let second = registry.open(TransferDirection::Upload, "http://b/clipboard", None);
        registry.start(second);
        registry.progress(second, 0.25);
        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot.iter().map(|job| job.id).collect::<Vec<_>>(),
            vec![first, second]
        );
        assert_eq!(snapshot[1].state, TransferState::InFlight);
        assert_eq!(snapshot[1].progress, 0.25);

        registry.finish(first, &Ok::<(), ClipboardError>(()));
        registry.finish(
            second,
            &Err::<(), _>(ClipboardError::Transport("refused".to_owned())),
        );
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.started.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn upload_fields_match_endpoint_form() {
        assert_eq!(UploadField::File.name(), "file");
        assert_eq!(UploadField::Data.name(), "data");
    }
}
