//! Front door for spoken output: picks a backend per request, adapts voice and
//! rate to the text, and sequences synthesis and playback.

use crate::adaptation::{RateProfile, VoiceAdaptation};
use crate::backends::{select_voice, SystemSpeech};
use crate::config_loader::Settings;
use crate::diagnostics::{CapabilityDiagnostics, VoiceDiagnostic};
use crate::error::SynthesisError;
use crate::locale::Locale;
use crate::models::{DownloadHandle, ModelDescriptor, ModelDownloader, ModelInstallState, ModelStore};
use crate::playback::{PlaybackDriver, PlaybackOutcome};
use crate::synthesis::{AudioClip, SynthesisEngine};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub locale_hint: Option<Locale>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, locale_hint: Option<Locale>) -> Self {
        Self {
            text: text.into(),
            locale_hint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Embedded,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Played to the end.
    Spoken { backend: Backend },
    /// Cut off by `stop()` or a newer request while playing.
    Interrupted { backend: Backend },
    /// Nothing to say.
    Skipped,
    /// A newer request arrived before this one reached the speaker.
    Superseded,
    Failed(String),
}

/// Everything the orchestrator drives. Built by the caller so tests can swap
/// any piece.
pub struct SpeechComponents {
    pub store: Arc<ModelStore>,
    pub downloader: ModelDownloader,
    pub engine: SynthesisEngine,
    pub playback: Arc<PlaybackDriver>,
    pub system: Arc<dyn SystemSpeech>,
    pub diagnostics: CapabilityDiagnostics,
}

struct Inner {
    store: Arc<ModelStore>,
    downloader: ModelDownloader,
    engine: Arc<Mutex<SynthesisEngine>>,
    playback: Arc<PlaybackDriver>,
    system: Arc<dyn SystemSpeech>,
    diagnostics: Arc<CapabilityDiagnostics>,
    system_locale: Locale,
    rates: RateProfile,
    enable_embedded: bool,
    /// Bumped by every `speak` and `stop`; a request whose number is no
    /// longer current must not start audio. Held across the currency check
    /// and the hand-off to the driver, so a stop cannot slip in between.
    generation: Mutex<u64>,
}

#[derive(Clone)]
pub struct SpeechOrchestrator {
    inner: Arc<Inner>,
}

impl SpeechOrchestrator {
    pub fn new(components: SpeechComponents, settings: &Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: components.store,
                downloader: components.downloader,
                engine: Arc::new(Mutex::new(components.engine)),
                playback: components.playback,
                system: components.system,
                diagnostics: Arc::new(components.diagnostics),
                system_locale: settings.system_locale(),
                rates: settings.rate_profile(),
                enable_embedded: settings.enable_embedded,
                generation: Mutex::new(0),
            }),
        }
    }

    /// Speak `text`, preempting anything already being said. Returns at once;
    /// await the handle for the outcome.
    pub fn speak(&self, text: &str, locale_hint: Option<Locale>) -> JoinHandle<SpeechOutcome> {
        let generation = self.inner.preempt();
        let inner = self.inner.clone();
        let request = SpeechRequest::new(text, locale_hint);
        tokio::spawn(async move { inner.run(generation, request).await })
    }

    pub fn stop(&self) {
        self.inner.preempt();
        debug!("Speech stopped");
    }

    /// Fresh capability snapshot, computed off the async workers.
    pub async fn diagnostic(&self) -> VoiceDiagnostic {
        let diagnostics = self.inner.diagnostics.clone();
        match tokio::task::spawn_blocking(move || diagnostics.perform_full_check()).await {
            Ok(diagnostic) => diagnostic,
            Err(e) => {
                warn!(error = %e, "Diagnostic task failed; running inline");
                self.inner.diagnostics.perform_full_check()
            }
        }
    }

    pub fn is_model_installed(&self, locale: &Locale) -> bool {
        self.inner.store.is_installed(locale)
    }

    pub fn model_state(&self, locale: &Locale) -> ModelInstallState {
        self.inner.store.state_of(locale)
    }

    pub fn list_models(&self) -> Vec<(ModelDescriptor, ModelInstallState)> {
        self.inner.store.list()
    }

    pub fn download_model<P, C>(&self, locale: &Locale, on_progress: P, on_complete: C) -> DownloadHandle
    where
        P: Fn(f32) + Send + 'static,
        C: FnOnce(bool) + Send + 'static,
    {
        self.inner.downloader.download(locale, on_progress, on_complete)
    }
}

impl Inner {
    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Invalidate every earlier request and silence the device.
    fn preempt(&self) -> u64 {
        let mut generation = self.generation();
        *generation += 1;
        self.playback.stop();
        *generation
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation() == generation
    }

    async fn run(&self, generation: u64, request: SpeechRequest) -> SpeechOutcome {
        if request.text.trim().is_empty() {
            return SpeechOutcome::Skipped;
        }
        let voice = VoiceAdaptation::for_text(
            &request.text,
            request.locale_hint.as_ref(),
            &self.system_locale,
            &self.rates,
        );
        let embedded = self.enable_embedded && self.store.is_installed(&voice.locale);
        info!(
            script = ?voice.script,
            locale = %voice.locale,
            rate = voice.rate,
            backend = if embedded { "embedded" } else { "system" },
            "Speaking"
        );

        if embedded {
            match self.synthesize_embedded(&request.text, &voice).await {
                Ok(clip) => return self.play(generation, clip, Backend::Embedded).await,
                Err(e) => warn!(error = %e, locale = %voice.locale, "Embedded voice failed; using system speech"),
            }
        }
        self.speak_system(generation, &request.text, &voice).await
    }

    async fn synthesize_embedded(&self, text: &str, voice: &VoiceAdaptation) -> Result<AudioClip, SynthesisError> {
        let engine = self.engine.clone();
        let locale = voice.locale.clone();
        let rate = voice.rate;
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
            if !engine.initialize(&locale) {
                return Err(SynthesisError::EngineNotInitialized);
            }
            engine.generate_at_rate(&text, rate)
        })
        .await
        .map_err(|e| SynthesisError::failed(format!("synthesis task failed: {}", e)))?
    }

    async fn play(&self, generation: u64, clip: AudioClip, backend: Backend) -> SpeechOutcome {
        let started = {
            let current = self.generation();
            if *current != generation {
                debug!(?backend, "Request superseded before playback");
                return SpeechOutcome::Superseded;
            }
            // The driver handles commands in order, so a later stop still
            // reaches this clip.
            self.playback.play(clip)
        };
        match started {
            Ok(completion) => playback_outcome(completion.wait().await, backend),
            Err(e) => SpeechOutcome::Failed(e.to_string()),
        }
    }

    async fn speak_system(&self, generation: u64, text: &str, voice: &VoiceAdaptation) -> SpeechOutcome {
        let system = self.system.clone();
        let locale = voice.locale.clone();
        let rate = voice.rate;
        // Voice setup may shell out, so keep it off the async workers.
        let configured = tokio::task::spawn_blocking(move || {
            let mut active = locale;
            if !system.set_locale(&active) {
                warn!(locale = %active, "System speech lacks locale; using en-US");
                active = Locale::us_english();
                system.set_locale(&active);
            }
            system.set_rate(rate);
            let voices = system.list_voices();
            let chosen = select_voice(&voices, &active);
            debug!(voice = ?chosen.map(|v| &v.id), locale = %active, "System voice selected");
            system.set_voice(chosen.map(|v| v.id.as_str()));
        })
        .await;
        if let Err(e) = configured {
            return SpeechOutcome::Failed(format!("voice setup failed: {}", e));
        }

        if !self.is_current(generation) {
            return SpeechOutcome::Superseded;
        }
        match self.system.render(text).await {
            Ok(clip) => self.play(generation, clip, Backend::System).await,
            Err(e) => {
                warn!(error = %e, "System speech failed");
                SpeechOutcome::Failed(e.to_string())
            }
        }
    }
}

fn playback_outcome(outcome: PlaybackOutcome, backend: Backend) -> SpeechOutcome {
    match outcome {
        PlaybackOutcome::Completed => SpeechOutcome::Spoken { backend },
        PlaybackOutcome::Stopped => SpeechOutcome::Interrupted { backend },
        PlaybackOutcome::Failed(reason) => SpeechOutcome::Failed(reason),
    }
}
