//! Turns text into waveforms with an installed embedded voice model.

pub mod onnx;
pub mod phonemize;

use crate::error::SynthesisError;
use crate::locale::Locale;
use crate::models::{ModelDescriptor, ModelStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use onnx::OnnxVoiceRuntime;
pub use phonemize::Phonemizer;

/// Mono PCM produced by one synthesis call and consumed by one playback.
#[derive(Debug, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / f64::from(self.channels.max(1));
        Duration::from_secs_f64(frames / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Loads model files from disk into something that can speak.
pub trait VoiceRuntime: Send + Sync {
    fn load(&self, dir: &Path, descriptor: &ModelDescriptor) -> Result<Box<dyn LoadedVoice>, SynthesisError>;
}

/// A resident voice model.
pub trait LoadedVoice: Send {
    fn sample_rate(&self) -> u32;

    /// `rate` is a speed multiplier; 1.0 is the model's natural pace.
    fn synthesize(&mut self, text: &str, rate: f32) -> Result<Vec<f32>, SynthesisError>;
}

struct Resident {
    folder: String,
    locale: Locale,
    voice: Box<dyn LoadedVoice>,
}

/// Holds at most one loaded model at a time.
pub struct SynthesisEngine {
    store: Arc<ModelStore>,
    runtime: Arc<dyn VoiceRuntime>,
    resident: Option<Resident>,
}

impl SynthesisEngine {
    pub fn new(store: Arc<ModelStore>, runtime: Arc<dyn VoiceRuntime>) -> Self {
        Self {
            store,
            runtime,
            resident: None,
        }
    }

    /// Load the installed model serving `locale`. Repeat calls that resolve to
    /// the resident model are free. Loading a different model replaces the
    /// resident one; if that load fails, nothing stays resident.
    pub fn initialize(&mut self, locale: &Locale) -> bool {
        let descriptor = self.store.descriptor_for(locale);
        if let Some(resident) = &self.resident {
            if resident.folder == descriptor.storage_folder {
                return true;
            }
        }

        if !self.store.is_installed(locale) {
            debug!(locale = %locale, folder = %descriptor.storage_folder, "No installed model");
            self.unload();
            return false;
        }

        let dir = self.store.model_dir(&descriptor);
        match self.runtime.load(&dir, &descriptor) {
            Ok(voice) => {
                info!(locale = %locale, folder = %descriptor.storage_folder, "Voice model loaded");
                self.resident = Some(Resident {
                    folder: descriptor.storage_folder,
                    locale: descriptor.locale,
                    voice,
                });
                true
            }
            Err(e) => {
                warn!(locale = %locale, error = %e, "Voice model failed to load");
                self.unload();
                false
            }
        }
    }

    pub fn unload(&mut self) {
        if let Some(resident) = self.resident.take() {
            debug!(folder = %resident.folder, "Voice model unloaded");
        }
    }

    /// Locale of the resident model's descriptor.
    pub fn loaded_locale(&self) -> Option<&Locale> {
        self.resident.as_ref().map(|r| &r.locale)
    }

    pub fn generate(&mut self, text: &str) -> Result<AudioClip, SynthesisError> {
        self.generate_at_rate(text, 1.0)
    }

    pub fn generate_at_rate(&mut self, text: &str, rate: f32) -> Result<AudioClip, SynthesisError> {
        let resident = self
            .resident
            .as_mut()
            .ok_or(SynthesisError::EngineNotInitialized)?;
        let samples = resident.voice.synthesize(text, rate)?;
        if samples.is_empty() {
            return Err(SynthesisError::failed("model produced no audio"));
        }
        let clip = AudioClip::mono(samples, resident.voice.sample_rate());
        debug!(samples = clip.samples.len(), secs = clip.duration().as_secs_f32(), "Generated clip");
        Ok(clip)
    }
}
