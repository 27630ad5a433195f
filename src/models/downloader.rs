use super::store::ModelStore;
use super::{ModelDescriptor, ModelInstallState};
use crate::error::DownloadError;
use crate::locale::Locale;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Fetches one artifact URL into a local file, returning the byte count.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, String>;
}

/// Plain HTTP GET, streamed to disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("speechout/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| format!("cannot create {}: {}", dest.display(), e))?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Installed,
    Failed(DownloadError),
    Cancelled,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// Shared between the running task and every handle that joined it.
struct InFlight {
    cancel: CancellationToken,
    progress: watch::Receiver<f32>,
    outcome: watch::Receiver<Option<DownloadOutcome>>,
}

/// Handle to a running (or finished) download. Clones observe the same
/// operation.
#[derive(Clone)]
pub struct DownloadHandle {
    locale: Locale,
    cancel: CancellationToken,
    progress: watch::Receiver<f32>,
    outcome: watch::Receiver<Option<DownloadOutcome>>,
    joined: bool,
}

impl DownloadHandle {
    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    /// Stop the transfer. Every handle sharing the operation sees
    /// [`DownloadOutcome::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True when this request attached to a download that was already running.
    pub fn joined_existing(&self) -> bool {
        self.joined
    }

    pub fn progress(&self) -> f32 {
        *self.progress.borrow()
    }

    /// True once the shared operation has an outcome. Cancelling a finished
    /// download does nothing.
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub async fn outcome(&self) -> DownloadOutcome {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // Sender dropped without an outcome: the task was torn down.
            Err(_) => None,
        };
        outcome.unwrap_or(DownloadOutcome::Cancelled)
    }
}

/// Installs embedded models into a [`ModelStore`]. At most one transfer runs
/// per storage folder; later requests for the same folder join it.
pub struct ModelDownloader {
    store: Arc<ModelStore>,
    fetcher: Arc<dyn ArtifactFetcher>,
    file_timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl ModelDownloader {
    pub fn new(store: Arc<ModelStore>, fetcher: Arc<dyn ArtifactFetcher>, file_timeout: Duration) -> Self {
        Self {
            store,
            fetcher,
            file_timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn is_downloading(&self, locale: &Locale) -> bool {
        let folder = self.store.descriptor_for(locale).storage_folder;
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&folder)
    }

    /// Start installing the model for `locale`, or join the transfer already
    /// running for it. `on_progress` receives completed-files / total-files;
    /// `on_complete` fires once with whether the model ended up installed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn download<P, C>(&self, locale: &Locale, on_progress: P, on_complete: C) -> DownloadHandle
    where
        P: Fn(f32) + Send + 'static,
        C: FnOnce(bool) + Send + 'static,
    {
        let descriptor = self.store.descriptor_for(locale);
        let folder = descriptor.storage_folder.clone();

        let handle = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(running) = in_flight.get(&folder) {
                info!(locale = %locale, folder = %folder, "Joining download already in progress");
                DownloadHandle {
                    locale: locale.clone(),
                    cancel: running.cancel.clone(),
                    progress: running.progress.clone(),
                    outcome: running.outcome.clone(),
                    joined: true,
                }
            } else {
                let cancel = CancellationToken::new();
                let (progress_tx, progress_rx) = watch::channel(0.0f32);
                let (outcome_tx, outcome_rx) = watch::channel(None);
                in_flight.insert(
                    folder.clone(),
                    InFlight {
                        cancel: cancel.clone(),
                        progress: progress_rx.clone(),
                        outcome: outcome_rx.clone(),
                    },
                );
                let prior = self.store.begin_download(&folder);
                info!(locale = %locale, folder = %folder, "Starting model download");

                let job = DownloadJob {
                    store: self.store.clone(),
                    fetcher: self.fetcher.clone(),
                    file_timeout: self.file_timeout,
                    descriptor,
                    cancel: cancel.clone(),
                    progress: progress_tx,
                };
                let in_flight_map = self.in_flight.clone();
                tokio::spawn(async move {
                    let outcome = job.run(prior).await;
                    in_flight_map
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&job.descriptor.storage_folder);
                    let _ = outcome_tx.send(Some(outcome));
                });

                DownloadHandle {
                    locale: locale.clone(),
                    cancel,
                    progress: progress_rx,
                    outcome: outcome_rx,
                    joined: false,
                }
            }
        };

        spawn_observer(handle.clone(), on_progress, on_complete);
        handle
    }
}

/// Forward progress and completion of `handle` to caller callbacks.
fn spawn_observer<P, C>(handle: DownloadHandle, on_progress: P, on_complete: C)
where
    P: Fn(f32) + Send + 'static,
    C: FnOnce(bool) + Send + 'static,
{
    tokio::spawn(async move {
        let mut progress = handle.progress.clone();
        let mut outcome = handle.outcome.clone();
        let mut reported = None;
        loop {
            tokio::select! {
                changed = progress.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let fraction = *progress.borrow_and_update();
                    on_progress(fraction);
                    reported = Some(fraction);
                }
                _ = outcome.wait_for(Option::is_some) => break,
            }
        }
        let last = *progress.borrow();
        if last > 0.0 && reported != Some(last) {
            on_progress(last);
        }
        on_complete(handle.outcome().await.is_success());
    });
}

struct DownloadJob {
    store: Arc<ModelStore>,
    fetcher: Arc<dyn ArtifactFetcher>,
    file_timeout: Duration,
    descriptor: ModelDescriptor,
    cancel: CancellationToken,
    progress: watch::Sender<f32>,
}

impl DownloadJob {
    async fn run(&self, prior: Option<ModelInstallState>) -> DownloadOutcome {
        let folder = &self.descriptor.storage_folder;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.fetch_and_install() => Some(result),
        };

        match result {
            None => {
                info!(folder = %folder, "Download cancelled");
                self.store.restore(folder, prior);
                DownloadOutcome::Cancelled
            }
            Some(Ok(())) => {
                self.store.mark_installed(folder);
                DownloadOutcome::Installed
            }
            Some(Err(e)) => {
                error!(folder = %folder, error = %e, "Download failed");
                self.store.mark_failed(folder, e.to_string());
                DownloadOutcome::Failed(e)
            }
        }
    }

    /// Fetch every required file into a fresh staging directory, then swap it
    /// into the store. The staging directory is removed on every early exit,
    /// including cancellation (the future is dropped with the `TempDir`).
    async fn fetch_and_install(&self) -> Result<(), DownloadError> {
        let folder = &self.descriptor.storage_folder;
        let staging = self
            .store
            .create_staging(&self.descriptor)
            .map_err(|e| DownloadError::InstallFailed(e.to_string()))?;

        let total = self.descriptor.required_files.len().max(1);
        for (index, file) in self.descriptor.required_files.iter().enumerate() {
            let url = self
                .descriptor
                .source_urls
                .get(file)
                .ok_or_else(|| DownloadError::failed(file.clone(), "no source URL configured"))?;
            let dest = staging.path().join(file);
            debug!(folder = %folder, file = %file, url = %url, "Fetching model file");

            let bytes = tokio::time::timeout(self.file_timeout, self.fetcher.fetch(url, &dest))
                .await
                .map_err(|_| {
                    DownloadError::failed(
                        file.clone(),
                        format!("timed out after {}s", self.file_timeout.as_secs()),
                    )
                })?
                .map_err(|cause| DownloadError::failed(file.clone(), cause))?;
            if bytes == 0 {
                return Err(DownloadError::failed(file.clone(), "empty response"));
            }

            let fraction = (index + 1) as f32 / total as f32;
            self.store.set_progress(folder, fraction);
            let _ = self.progress.send(fraction);
            debug!(folder = %folder, file = %file, bytes, progress = fraction, "Model file fetched");
        }

        self.store.install_staged(&self.descriptor, staging.path())
    }
}
