use crate::adaptation::RateProfile;
use crate::locale::Locale;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Embedded voices
    pub models_dir: String,
    pub model_mirror: String, // "" = upstream URLs
    pub enable_embedded: bool,
    pub download_timeout_secs: u64, // Per artifact file
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    pub inference_threads: usize,
    // System speech
    pub espeak_binary: String,
    pub preferred_tts_engine: String,
    pub recognition_providers: Vec<String>,
    pub synthesis_timeout_secs: u64, // External process calls
    pub system_locale: String,       // "" = from LC_ALL / LC_MESSAGES / LANG
    // Voice adaptation
    pub rate_japanese: f32,
    pub rate_latin: f32,
    pub rate_neutral: f32,
    // Playback
    pub playback_volume: f32, // 0.0 - 1.0
}

fn default_models_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("speechout/models")
        .to_string_lossy()
        .into_owned()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            model_mirror: String::new(),
            enable_embedded: true,
            download_timeout_secs: 300,
            noise_scale: 0.667,
            noise_scale_w: 0.8,
            inference_threads: 1,
            espeak_binary: "espeak-ng".to_string(),
            preferred_tts_engine: "espeak-ng".to_string(),
            recognition_providers: vec!["vosk-transcriber".to_string(), "whisper".to_string()],
            synthesis_timeout_secs: 10,
            system_locale: String::new(),
            rate_japanese: 1.5,
            rate_latin: 1.2,
            rate_neutral: 1.0,
            playback_volume: 1.0,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        Self::load(None)
    }

    /// Defaults, then `./SpeechOut.*`, then `~/.config/speechout/SpeechOut.*`,
    /// then `extra` if given, then `SPEECHOUT_*` environment variables.
    pub fn load(extra: Option<&Path>) -> Result<Self, config::ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            // Embedded voices
            .set_default("models_dir", defaults.models_dir)?
            .set_default("model_mirror", defaults.model_mirror)?
            .set_default("enable_embedded", defaults.enable_embedded)?
            .set_default("download_timeout_secs", defaults.download_timeout_secs)?
            .set_default("noise_scale", f64::from(defaults.noise_scale))?
            .set_default("noise_scale_w", f64::from(defaults.noise_scale_w))?
            .set_default("inference_threads", defaults.inference_threads as u64)?
            // System speech
            .set_default("espeak_binary", defaults.espeak_binary)?
            .set_default("preferred_tts_engine", defaults.preferred_tts_engine)?
            .set_default("recognition_providers", defaults.recognition_providers)?
            .set_default("synthesis_timeout_secs", defaults.synthesis_timeout_secs)?
            .set_default("system_locale", defaults.system_locale)?
            // Voice adaptation
            .set_default("rate_japanese", f64::from(defaults.rate_japanese))?
            .set_default("rate_latin", f64::from(defaults.rate_latin))?
            .set_default("rate_neutral", f64::from(defaults.rate_neutral))?
            .set_default("playback_volume", f64::from(defaults.playback_volume))?
            // Merge with local config file (if exists)
            .add_source(File::with_name("SpeechOut").required(false));

        if let Some(config_dir) = dirs::config_dir() {
            builder = builder.add_source(
                File::from(config_dir.join("speechout/SpeechOut")).required(false),
            );
        }
        if let Some(path) = extra {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Merge with environment variables (e.g. SPEECHOUT_MODEL_MIRROR)
        let builder = builder.add_source(
            Environment::with_prefix("SPEECHOUT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("recognition_providers"),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(0.0..=1.0).contains(&self.playback_volume) {
            return Err(config::ConfigError::Message(format!(
                "Invalid playback_volume: {}. Must be between 0.0 and 1.0",
                self.playback_volume
            )));
        }
        for (key, rate) in [
            ("rate_japanese", self.rate_japanese),
            ("rate_latin", self.rate_latin),
            ("rate_neutral", self.rate_neutral),
        ] {
            if !(0.1..=4.0).contains(&rate) {
                return Err(config::ConfigError::Message(format!(
                    "Invalid {}: {}. Must be between 0.1 and 4.0",
                    key, rate
                )));
            }
        }
        if self.download_timeout_secs == 0 || self.synthesis_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.inference_threads == 0 {
            return Err(config::ConfigError::Message(
                "inference_threads must be greater than 0".to_string(),
            ));
        }
        if !self.system_locale.is_empty() && self.system_locale.parse::<Locale>().is_err() {
            return Err(config::ConfigError::Message(format!(
                "Invalid system_locale: '{}'",
                self.system_locale
            )));
        }
        Ok(())
    }

    pub fn models_path(&self) -> PathBuf {
        PathBuf::from(&self.models_dir)
    }

    /// The configured locale, or the host's when unset.
    pub fn system_locale(&self) -> Locale {
        if self.system_locale.is_empty() {
            return Locale::system_default();
        }
        self.system_locale.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring system_locale setting");
            Locale::system_default()
        })
    }

    pub fn rate_profile(&self) -> RateProfile {
        RateProfile::from_settings(self)
    }
}
