//! Per-request voice adaptation: which language a text sounds like and how
//! fast it should be spoken.

use crate::config_loader::Settings;
use crate::locale::Locale;
use serde::Serialize;

/// How many leading characters are inspected when classifying a text.
pub const SCRIPT_SAMPLE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Script {
    Japanese,
    Latin,
    Other,
}

fn is_japanese(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'   // Hiragana
        | '\u{30A0}'..='\u{30FF}' // Katakana
        | '\u{4E00}'..='\u{9FAF}' // CJK unified ideographs (Kanji)
    )
}

/// Classify the first [`SCRIPT_SAMPLE_CHARS`] characters of `text`.
///
/// Any kana or kanji wins over Latin letters, so mixed text such as
/// "Rustは速い" is Japanese.
pub fn classify_script(text: &str) -> Script {
    let sample = || text.chars().take(SCRIPT_SAMPLE_CHARS);
    if sample().any(is_japanese) {
        Script::Japanese
    } else if sample().any(|c| c.is_ascii_alphabetic()) {
        Script::Latin
    } else {
        Script::Other
    }
}

/// Speaking-rate multipliers per script. 1.0 is the engine's normal speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateProfile {
    pub japanese: f32,
    pub latin: f32,
    pub neutral: f32,
}

impl Default for RateProfile {
    fn default() -> Self {
        Self {
            japanese: 1.5,
            latin: 1.2,
            neutral: 1.0,
        }
    }
}

impl RateProfile {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            japanese: settings.rate_japanese,
            latin: settings.rate_latin,
            neutral: settings.rate_neutral,
        }
    }

    pub fn for_script(&self, script: Script) -> f32 {
        match script {
            Script::Japanese => self.japanese,
            Script::Latin => self.latin,
            Script::Other => self.neutral,
        }
    }
}

/// The voice parameters chosen for one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceAdaptation {
    pub script: Script,
    pub locale: Locale,
    pub rate: f32,
}

impl VoiceAdaptation {
    /// Japanese text speaks as `ja`, Latin text as `en-US`; anything else
    /// uses the caller's hint, or the system locale without one.
    pub fn for_text(
        text: &str,
        locale_hint: Option<&Locale>,
        system_locale: &Locale,
        rates: &RateProfile,
    ) -> Self {
        let script = classify_script(text);
        let locale = match script {
            Script::Japanese => Locale::japanese(),
            Script::Latin => Locale::us_english(),
            Script::Other => locale_hint.unwrap_or(system_locale).clone(),
        };
        Self {
            script,
            locale,
            rate: rates.for_script(script),
        }
    }
}
