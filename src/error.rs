use thiserror::Error;

/// Catalog construction and lookups. Lookup errors rarely surface: the
/// store resolves unmapped locales to the default descriptor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no voice model is mapped to locale '{locale}'")]
    UnsupportedLocale { locale: String },

    #[error("model catalog needs at least one entry")]
    EmptyCatalog,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("failed to download {file}: {cause}")]
    DownloadFailed { file: String, cause: String },

    #[error("failed to install model: {0}")]
    InstallFailed(String),
}

impl DownloadError {
    pub fn failed(file: impl Into<String>, cause: impl ToString) -> Self {
        Self::DownloadFailed {
            file: file.into(),
            cause: cause.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("synthesis engine is not initialized")]
    EngineNotInitialized,

    #[error("synthesis failed: {reason}")]
    SynthesisFailed { reason: String },
}

impl SynthesisError {
    pub fn failed(reason: impl ToString) -> Self {
        Self::SynthesisFailed {
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("playback driver has shut down")]
    DriverStopped,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("system speech backend failed: {0}")]
    Backend(String),
}

/// Degraded capabilities found by diagnostics. The display text is what the
/// user sees in a suggestion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityIssue {
    #[error("No speech recognition service was found on this system")]
    RecognitionUnavailable,

    #[error("The speech synthesis engine could not be initialized")]
    CapabilityUnavailable,

    #[error("{engine} is installed but is not selected as the speech engine")]
    EngineHidden { engine: String },

    #[error("Voice data for {locale} is missing in {engine}")]
    VoiceDataMissing { locale: String, engine: String },

    #[error("{active} is active; {preferred} offers higher quality voices")]
    EngineNotPreferred { active: String, preferred: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_failed_message_names_file() {
        let err = DownloadError::failed("tokens.txt", "HTTP 404");
        assert_eq!(err.to_string(), "failed to download tokens.txt: HTTP 404");
    }

    #[test]
    fn test_speech_error_is_transparent_over_synthesis() {
        let err: SpeechError = SynthesisError::EngineNotInitialized.into();
        assert_eq!(err.to_string(), "synthesis engine is not initialized");
    }
}
