//! Explains why speech input or output may not work, with concrete fixes.

use crate::backends::SpeechCapabilities;
use crate::error::CapabilityIssue;
use crate::locale::Locale;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Ready,
    /// Usable but degraded.
    Warning,
    /// Not usable.
    Error,
}

/// Where a suggestion sends the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsTarget {
    /// System text-to-speech settings (engine selection, voice data).
    TtsSettings,
    /// Installing a speech recognition provider.
    RecognitionProvider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticSuggestion {
    pub message: String,
    pub action_label: Option<String>,
    pub remediation: Option<SettingsTarget>,
    pub is_system_setting: bool,
}

impl DiagnosticSuggestion {
    fn new(issue: CapabilityIssue, action_label: &str, remediation: SettingsTarget) -> Self {
        Self {
            message: issue.to_string(),
            action_label: Some(action_label.to_string()),
            remediation: Some(remediation),
            is_system_setting: false,
        }
    }

    fn system_setting(mut self) -> Self {
        self.is_system_setting = true;
        self
    }
}

/// Snapshot of speech capability. Built fresh on every check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceDiagnostic {
    pub stt_status: DiagnosticStatus,
    pub tts_status: DiagnosticStatus,
    pub stt_engine_name: Option<String>,
    pub tts_engine_name: Option<String>,
    pub missing_languages: Vec<String>,
    /// Recognition suggestions first, then synthesis.
    pub suggestions: Vec<DiagnosticSuggestion>,
    pub output_device: Option<String>,
    pub checked_at: DateTime<Utc>,
}

struct ComponentCheck {
    status: DiagnosticStatus,
    engine: Option<String>,
    suggestions: Vec<DiagnosticSuggestion>,
    missing_languages: Vec<String>,
}

pub struct CapabilityDiagnostics {
    caps: Arc<dyn SpeechCapabilities>,
    preferred_engine: String,
    system_locale: Locale,
}

impl CapabilityDiagnostics {
    pub fn new(caps: Arc<dyn SpeechCapabilities>, preferred_engine: impl Into<String>, system_locale: Locale) -> Self {
        Self {
            caps,
            preferred_engine: preferred_engine.into(),
            system_locale,
        }
    }

    /// Query the host and describe what works. Blocking: capability probes may
    /// spawn processes.
    pub fn perform_full_check(&self) -> VoiceDiagnostic {
        let stt = self.check_recognition();
        let tts = self.check_synthesis();

        let mut suggestions = stt.suggestions;
        suggestions.extend(tts.suggestions);

        let diagnostic = VoiceDiagnostic {
            stt_status: stt.status,
            tts_status: tts.status,
            stt_engine_name: stt.engine,
            tts_engine_name: tts.engine,
            missing_languages: tts.missing_languages,
            suggestions,
            output_device: self.caps.output_device(),
            checked_at: Utc::now(),
        };
        info!(
            stt = ?diagnostic.stt_status,
            tts = ?diagnostic.tts_status,
            suggestions = diagnostic.suggestions.len(),
            "Voice diagnostic complete"
        );
        diagnostic
    }

    fn check_recognition(&self) -> ComponentCheck {
        match self.caps.recognition_engine() {
            Some(engine) => ComponentCheck {
                status: DiagnosticStatus::Ready,
                engine: Some(engine),
                suggestions: Vec::new(),
                missing_languages: Vec::new(),
            },
            None => ComponentCheck {
                status: DiagnosticStatus::Error,
                engine: None,
                suggestions: vec![DiagnosticSuggestion::new(
                    CapabilityIssue::RecognitionUnavailable,
                    "Install",
                    SettingsTarget::RecognitionProvider,
                )],
                missing_languages: Vec::new(),
            },
        }
    }

    fn check_synthesis(&self) -> ComponentCheck {
        let Some(engine) = self.caps.active_synthesis_engine() else {
            // Selecting an installed engine and installing one are different
            // fixes, so tell them apart.
            let issue = if self.caps.is_engine_installed(&self.preferred_engine) {
                CapabilityIssue::EngineHidden {
                    engine: self.preferred_engine.clone(),
                }
            } else {
                CapabilityIssue::CapabilityUnavailable
            };
            return ComponentCheck {
                status: DiagnosticStatus::Error,
                engine: None,
                suggestions: vec![
                    DiagnosticSuggestion::new(issue, "Fix in settings", SettingsTarget::TtsSettings).system_setting(),
                ],
                missing_languages: Vec::new(),
            };
        };

        let mut status = DiagnosticStatus::Ready;
        let mut suggestions = Vec::new();
        let mut missing_languages = Vec::new();

        if !self.caps.is_language_available(&self.system_locale) {
            status = DiagnosticStatus::Warning;
            missing_languages.push(self.system_locale.to_string());
            suggestions.push(DiagnosticSuggestion::new(
                CapabilityIssue::VoiceDataMissing {
                    locale: self.system_locale.to_string(),
                    engine: engine.clone(),
                },
                "Manage voice data",
                SettingsTarget::TtsSettings,
            ));
        }

        if engine != self.preferred_engine {
            suggestions.push(DiagnosticSuggestion::new(
                CapabilityIssue::EngineNotPreferred {
                    active: engine.clone(),
                    preferred: self.preferred_engine.clone(),
                },
                &format!("Select {}", self.preferred_engine),
                SettingsTarget::TtsSettings,
            ));
        }

        ComponentCheck {
            status,
            engine: Some(engine),
            suggestions,
            missing_languages,
        }
    }
}
