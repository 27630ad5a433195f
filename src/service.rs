use crate::locale::Locale;
use crate::models::DownloadHandle;
use crate::orchestrator::SpeechOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use zbus::{interface, SignalContext};

pub const SERVICE_NAME: &str = "org.speechout.Output";
pub const OBJECT_PATH: &str = "/org/speechout/Output";

pub struct SpeechOutputService {
    pub orchestrator: SpeechOrchestrator,
    pub downloads: Arc<Mutex<HashMap<String, DownloadHandle>>>,
}

impl SpeechOutputService {
    pub fn new(orchestrator: SpeechOrchestrator) -> Self {
        Self {
            orchestrator,
            downloads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn downloads(&self) -> MutexGuard<'_, HashMap<String, DownloadHandle>> {
        self.downloads.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remember `handle` so a later `CancelDownload` can reach it. Finished
    /// downloads are dropped from the table on the way.
    pub fn track_download(&self, locale: &Locale, handle: DownloadHandle) {
        let mut downloads = self.downloads();
        downloads.retain(|_, tracked| !tracked.is_finished());
        downloads.insert(locale.to_string(), handle);
    }

    /// Cancel the tracked download for `locale`. False when none is running.
    pub fn cancel_download_for(&self, locale: &Locale) -> bool {
        match self.downloads().remove(&locale.to_string()) {
            Some(handle) if !handle.is_finished() => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }
}

fn parse_locale(raw: &str) -> zbus::fdo::Result<Locale> {
    raw.parse()
        .map_err(|e: crate::locale::InvalidLocale| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "org.speechout.Output")]
impl SpeechOutputService {
    #[zbus(name = "Ping")]
    async fn ping(&self) -> String {
        "pong".to_string()
    }

    #[zbus(name = "GetVersion")]
    async fn get_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// `locale_hint` may be empty.
    #[zbus(name = "Speak")]
    async fn speak(&self, text: String, locale_hint: String) -> zbus::fdo::Result<()> {
        let hint = if locale_hint.trim().is_empty() {
            None
        } else {
            Some(parse_locale(&locale_hint)?)
        };
        debug!(chars = text.chars().count(), hint = ?hint, "Received speak request");

        let handle = self.orchestrator.speak(&text, hint);
        tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => debug!(outcome = ?outcome, "Speak request finished"),
                Err(e) => warn!(error = %e, "Speak task aborted"),
            }
        });
        Ok(())
    }

    #[zbus(name = "Stop")]
    async fn stop(&self) {
        self.orchestrator.stop();
    }

    /// Capability snapshot as JSON.
    #[zbus(name = "GetDiagnostic")]
    async fn get_diagnostic(&self) -> zbus::fdo::Result<String> {
        let diagnostic = self.orchestrator.diagnostic().await;
        serde_json::to_string(&diagnostic).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    #[zbus(name = "IsModelInstalled")]
    async fn is_model_installed(&self, locale: String) -> zbus::fdo::Result<bool> {
        Ok(self.orchestrator.is_model_installed(&parse_locale(&locale)?))
    }

    /// Install state as JSON, e.g. `{"state":"downloading","progress":0.5}`.
    #[zbus(name = "ModelState")]
    async fn model_state(&self, locale: String) -> zbus::fdo::Result<String> {
        let state = self.orchestrator.model_state(&parse_locale(&locale)?);
        serde_json::to_string(&state).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// (locale, folder, state) per catalog entry.
    #[zbus(name = "ListModels")]
    async fn list_models(&self) -> Vec<(String, String, String)> {
        self.orchestrator
            .list_models()
            .into_iter()
            .map(|(descriptor, state)| (descriptor.locale.to_string(), descriptor.storage_folder, state.label()))
            .collect()
    }

    /// Returns "started", or "joined" when a download for the same model was
    /// already running.
    #[zbus(name = "DownloadModel")]
    async fn download_model(
        &self,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
        locale: String,
    ) -> zbus::fdo::Result<String> {
        let parsed = parse_locale(&locale)?;
        let progress_ctxt = ctxt.to_owned();
        let progress_locale = locale.clone();
        let finished_ctxt = ctxt.to_owned();
        let finished_locale = locale.clone();

        let handle = self.orchestrator.download_model(
            &parsed,
            move |fraction| {
                let ctxt = progress_ctxt.clone();
                let locale = progress_locale.clone();
                tokio::spawn(async move {
                    if let Err(e) = Self::download_progress(&ctxt, &locale, f64::from(fraction)).await {
                        warn!(error = %e, "Failed to emit DownloadProgress");
                    }
                });
            },
            move |success| {
                tokio::spawn(async move {
                    if let Err(e) = Self::download_finished(&finished_ctxt, &finished_locale, success).await {
                        warn!(error = %e, "Failed to emit DownloadFinished");
                    }
                });
            },
        );

        let status = if handle.joined_existing() { "joined" } else { "started" };
        info!(locale = %locale, status, "DownloadModel");
        self.track_download(&parsed, handle);
        Ok(status.to_string())
    }

    /// Returns false if no download is running for this locale.
    #[zbus(name = "CancelDownload")]
    async fn cancel_download(&self, locale: String) -> zbus::fdo::Result<bool> {
        Ok(self.cancel_download_for(&parse_locale(&locale)?))
    }

    #[zbus(signal)]
    async fn download_progress(ctxt: &SignalContext<'_>, locale: &str, fraction: f64) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn download_finished(ctxt: &SignalContext<'_>, locale: &str, success: bool) -> zbus::Result<()>;
}
