//! Embedded voice models: the static catalog of what can be installed, the
//! on-disk store, and the downloader that fills it.

pub mod downloader;
pub mod store;

use crate::error::ModelError;
use crate::locale::Locale;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub use downloader::{ArtifactFetcher, DownloadHandle, DownloadOutcome, HttpFetcher, ModelDownloader};
pub use store::ModelStore;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENS_FILE: &str = "tokens.txt";

const NANAMI_BASE: &str =
    "https://huggingface.co/csukuangfj/sherpa-onnx-tts-ja-jp-vits-piper-nanami/resolve/main";
const AMY_BASE: &str = "https://huggingface.co/csukuangfj/vits-piper-en_US-amy-low/resolve/main";

/// Everything needed to fetch, verify and load one embedded voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub locale: Locale,
    /// Directory name under the models root. Also the unit of download
    /// mutual exclusion.
    pub storage_folder: String,
    pub required_files: BTreeSet<String>,
    /// Local file name to the URL it is fetched from.
    pub source_urls: BTreeMap<String, String>,
    pub model_file: String,
    pub tokens_file: String,
    /// espeak-ng voice used to turn text into phonemes for this model.
    pub phonemizer_voice: String,
    pub sample_rate: u32,
}

impl ModelDescriptor {
    fn vits_piper(locale: Locale, folder: &str, voice: &str, model_url: String, tokens_url: String) -> Self {
        let source_urls = BTreeMap::from([
            (MODEL_FILE.to_string(), model_url),
            (TOKENS_FILE.to_string(), tokens_url),
        ]);
        Self {
            locale,
            storage_folder: folder.to_string(),
            required_files: source_urls.keys().cloned().collect(),
            source_urls,
            model_file: MODEL_FILE.to_string(),
            tokens_file: TOKENS_FILE.to_string(),
            phonemizer_voice: voice.to_string(),
            sample_rate: 22050,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelInstallState {
    NotInstalled,
    Downloading { progress: f32 },
    Installed,
    Failed { reason: String },
}

impl ModelInstallState {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed)
    }

    /// Short form for logs and the control CLI.
    pub fn label(&self) -> String {
        match self {
            Self::NotInstalled => "not installed".to_string(),
            Self::Downloading { progress } => format!("downloading ({:.0}%)", progress * 100.0),
            Self::Installed => "installed".to_string(),
            Self::Failed { reason } => format!("failed: {}", reason),
        }
    }
}

/// The fixed set of installable voices. Locales without an entry resolve to
/// the default (US English) descriptor through [`ModelStore`].
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelDescriptor>,
    default_index: usize,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        let entries = vec![
            ModelDescriptor::vits_piper(
                Locale::japanese(),
                "vits-piper-ja-nanami",
                "ja",
                format!("{}/{}", NANAMI_BASE, MODEL_FILE),
                format!("{}/{}", NANAMI_BASE, TOKENS_FILE),
            ),
            ModelDescriptor::vits_piper(
                Locale::us_english(),
                "vits-piper-en-amy",
                "en-us",
                format!("{}/en_US-amy-low.onnx", AMY_BASE),
                format!("{}/{}", AMY_BASE, TOKENS_FILE),
            ),
        ];
        Self {
            entries,
            default_index: 1,
        }
    }

    /// Custom table, mostly for tests. The first entry whose locale equals
    /// `default_locale` becomes the default; without one, the first entry.
    pub fn new(entries: Vec<ModelDescriptor>, default_locale: &Locale) -> Result<Self, ModelError> {
        if entries.is_empty() {
            return Err(ModelError::EmptyCatalog);
        }
        let default_index = entries
            .iter()
            .position(|d| &d.locale == default_locale)
            .unwrap_or(0);
        Ok(Self {
            entries,
            default_index,
        })
    }

    /// Repoint every artifact to `<mirror>/<folder>/<file>`. An empty mirror
    /// leaves the upstream URLs alone.
    pub fn with_mirror(mut self, mirror: &str) -> Self {
        let mirror = mirror.trim_end_matches('/');
        if mirror.is_empty() {
            return self;
        }
        for entry in &mut self.entries {
            for (file, url) in entry.source_urls.iter_mut() {
                *url = format!("{}/{}/{}", mirror, entry.storage_folder, file);
            }
        }
        self
    }

    /// Exact match first, then any entry for the same language.
    pub fn lookup(&self, locale: &Locale) -> Result<&ModelDescriptor, ModelError> {
        self.entries
            .iter()
            .find(|d| &d.locale == locale)
            .or_else(|| self.entries.iter().find(|d| d.locale.same_language(locale)))
            .ok_or_else(|| ModelError::UnsupportedLocale {
                locale: locale.to_string(),
            })
    }

    pub fn default_descriptor(&self) -> &ModelDescriptor {
        &self.entries[self.default_index]
    }

    pub fn entries(&self) -> &[ModelDescriptor] {
        &self.entries
    }
}
