use speechout::backends::SpeechCapabilities;
use speechout::diagnostics::{CapabilityDiagnostics, DiagnosticStatus, SettingsTarget};
use speechout::locale::Locale;
use std::sync::Arc;

mockall::mock! {
    pub Capabilities {}
    impl SpeechCapabilities for Capabilities {
        fn recognition_engine(&self) -> Option<String>;
        fn active_synthesis_engine(&self) -> Option<String>;
        fn is_engine_installed(&self, engine: &str) -> bool;
        fn is_language_available(&self, locale: &Locale) -> bool;
        fn output_device(&self) -> Option<String>;
    }
}

fn diagnostics(caps: MockCapabilities) -> CapabilityDiagnostics {
    CapabilityDiagnostics::new(Arc::new(caps), "espeak-ng", "ja-JP".parse().unwrap())
}

fn healthy() -> MockCapabilities {
    let mut caps = MockCapabilities::new();
    caps.expect_recognition_engine()
        .returning(|| Some("vosk-transcriber".to_string()));
    caps.expect_active_synthesis_engine()
        .returning(|| Some("espeak-ng".to_string()));
    caps.expect_is_language_available().returning(|_| true);
    caps.expect_output_device()
        .returning(|| Some("default".to_string()));
    caps
}

#[test]
fn test_everything_ready() {
    let diag = diagnostics(healthy()).perform_full_check();
    assert_eq!(diag.stt_status, DiagnosticStatus::Ready);
    assert_eq!(diag.tts_status, DiagnosticStatus::Ready);
    assert_eq!(diag.stt_engine_name.as_deref(), Some("vosk-transcriber"));
    assert_eq!(diag.tts_engine_name.as_deref(), Some("espeak-ng"));
    assert_eq!(diag.output_device.as_deref(), Some("default"));
    assert!(diag.suggestions.is_empty());
    assert!(diag.missing_languages.is_empty());
}

#[test]
fn test_no_engine_is_error_with_install_hint() {
    let mut caps = MockCapabilities::new();
    caps.expect_recognition_engine()
        .returning(|| Some("whisper".to_string()));
    caps.expect_active_synthesis_engine().returning(|| None);
    caps.expect_is_engine_installed()
        .withf(|engine: &str| engine == "espeak-ng")
        .times(1)
        .returning(|_| false);
    caps.expect_is_language_available().times(0);
    caps.expect_output_device().returning(|| None);

    let diag = diagnostics(caps).perform_full_check();
    assert_eq!(diag.tts_status, DiagnosticStatus::Error);
    assert_eq!(diag.tts_engine_name, None);
    assert_eq!(diag.suggestions.len(), 1);
    let hint = &diag.suggestions[0];
    assert_eq!(hint.message, "The speech synthesis engine could not be initialized");
    assert_eq!(hint.remediation, Some(SettingsTarget::TtsSettings));
    assert!(hint.is_system_setting);
}

#[test]
fn test_installed_but_hidden_engine_gets_select_hint() {
    let mut caps = MockCapabilities::new();
    caps.expect_recognition_engine()
        .returning(|| Some("whisper".to_string()));
    caps.expect_active_synthesis_engine().returning(|| None);
    caps.expect_is_engine_installed().returning(|_| true);
    caps.expect_output_device().returning(|| None);

    let diag = diagnostics(caps).perform_full_check();
    assert_eq!(diag.tts_status, DiagnosticStatus::Error);
    assert_eq!(
        diag.suggestions[0].message,
        "espeak-ng is installed but is not selected as the speech engine"
    );
}

#[test]
fn test_missing_voice_data_is_warning() {
    let mut caps = MockCapabilities::new();
    caps.expect_recognition_engine()
        .returning(|| Some("whisper".to_string()));
    caps.expect_active_synthesis_engine()
        .returning(|| Some("espeak-ng".to_string()));
    caps.expect_is_language_available()
        .withf(|locale: &Locale| locale.to_string() == "ja-JP")
        .returning(|_| false);
    caps.expect_output_device().returning(|| None);

    let diag = diagnostics(caps).perform_full_check();
    assert_eq!(diag.tts_status, DiagnosticStatus::Warning);
    assert_eq!(diag.missing_languages, vec!["ja-JP".to_string()]);
    assert_eq!(diag.suggestions.len(), 1);
    assert_eq!(
        diag.suggestions[0].message,
        "Voice data for ja-JP is missing in espeak-ng"
    );
    assert!(!diag.suggestions[0].is_system_setting);
}

#[test]
fn test_non_preferred_engine_adds_hint_without_changing_status() {
    let mut caps = MockCapabilities::new();
    caps.expect_recognition_engine()
        .returning(|| Some("whisper".to_string()));
    caps.expect_active_synthesis_engine()
        .returning(|| Some("festival".to_string()));
    caps.expect_is_language_available().returning(|_| true);
    caps.expect_output_device().returning(|| None);

    let diag = diagnostics(caps).perform_full_check();
    assert_eq!(diag.tts_status, DiagnosticStatus::Ready);
    assert_eq!(diag.suggestions.len(), 1);
    assert_eq!(
        diag.suggestions[0].message,
        "festival is active; espeak-ng offers higher quality voices"
    );
    assert_eq!(diag.suggestions[0].action_label.as_deref(), Some("Select espeak-ng"));
}

#[test]
fn test_recognition_suggestions_come_first() {
    let mut caps = MockCapabilities::new();
    caps.expect_recognition_engine().returning(|| None);
    caps.expect_active_synthesis_engine()
        .returning(|| Some("festival".to_string()));
    caps.expect_is_language_available().returning(|_| false);
    caps.expect_output_device().returning(|| None);

    let diag = diagnostics(caps).perform_full_check();
    assert_eq!(diag.stt_status, DiagnosticStatus::Error);
    assert_eq!(diag.tts_status, DiagnosticStatus::Warning);
    let targets: Vec<_> = diag.suggestions.iter().map(|s| s.remediation).collect();
    assert_eq!(
        targets,
        vec![
            Some(SettingsTarget::RecognitionProvider),
            Some(SettingsTarget::TtsSettings),
            Some(SettingsTarget::TtsSettings),
        ]
    );
    assert_eq!(
        diag.suggestions[0].message,
        "No speech recognition service was found on this system"
    );
}

#[test]
fn test_each_check_is_a_fresh_snapshot() {
    let mut caps = MockCapabilities::new();
    let mut calls = 0;
    caps.expect_recognition_engine().times(2).returning(move || {
        calls += 1;
        (calls > 1).then(|| "whisper".to_string())
    });
    caps.expect_active_synthesis_engine()
        .returning(|| Some("espeak-ng".to_string()));
    caps.expect_is_language_available().returning(|_| true);
    caps.expect_output_device().returning(|| None);

    let diagnostics = diagnostics(caps);
    let first = diagnostics.perform_full_check();
    let second = diagnostics.perform_full_check();
    assert_eq!(first.stt_status, DiagnosticStatus::Error);
    assert_eq!(second.stt_status, DiagnosticStatus::Ready);
    assert!(second.checked_at >= first.checked_at);
}
