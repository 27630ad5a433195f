pub mod espeak;

use crate::error::SpeechError;
use crate::locale::Locale;
use crate::synthesis::AudioClip;
use async_trait::async_trait;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

pub use espeak::EspeakBackend;

/// Represents a text-to-speech voice
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    /// Language tag as the engine reports it, e.g. "en-us".
    pub language: String,
    pub requires_network: bool,
}

impl Voice {
    pub fn speaks(&self, locale: &Locale) -> bool {
        self.language
            .split(['-', '_'])
            .next()
            .is_some_and(|lang| lang.eq_ignore_ascii_case(locale.language()))
    }
}

/// Read-only view of what the host can do for speech, used by diagnostics.
pub trait SpeechCapabilities: Send + Sync {
    /// Name of a usable speech recognition provider, if any.
    fn recognition_engine(&self) -> Option<String>;

    /// Name of the synthesis engine that would speak right now, if any.
    fn active_synthesis_engine(&self) -> Option<String>;

    /// Whether `engine` is present on the system, active or not.
    fn is_engine_installed(&self, engine: &str) -> bool;

    /// Whether the active engine has voice data for `locale`.
    fn is_language_available(&self, locale: &Locale) -> bool;

    fn output_device(&self) -> Option<String>;
}

/// The host's own text-to-speech, used whenever no embedded model can speak.
///
/// Backends only render audio. Playing it is left to the caller, which owns
/// the output device and decides whether the request is still wanted.
#[async_trait]
pub trait SystemSpeech: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "espeak-ng")
    fn id(&self) -> &str;

    /// Switch language. Returns false if the engine has no voice for it.
    fn set_locale(&self, locale: &Locale) -> bool;

    /// Speaking rate multiplier, 1.0 being the engine default.
    fn set_rate(&self, rate: f32);

    fn list_voices(&self) -> Vec<Voice>;

    /// Pin a voice by id; `None` goes back to the engine's default for the
    /// current language.
    fn set_voice(&self, voice_id: Option<&str>);

    /// Render `text` with the current locale, rate and voice.
    async fn render(&self, text: &str) -> std::result::Result<AudioClip, SpeechError>;
}

/// Pick the best voice for `locale`: an offline voice for the language,
/// then any voice for the language. `None` means use the engine default.
pub fn select_voice<'a>(voices: &'a [Voice], locale: &Locale) -> Option<&'a Voice> {
    voices
        .iter()
        .find(|v| v.speaks(locale) && !v.requires_network)
        .or_else(|| voices.iter().find(|v| v.speaks(locale)))
}

/// Resolve a binary name against `PATH`. Path-like names are checked as is.
pub(crate) fn find_binary(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.is_file() { Some(p) } else { None };
    }

    if let Some(paths_os) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths_os) {
            let candidate = dir.join(bin);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Run `binary` with `input` on stdin and return its stdout, killing it if it
/// has not exited within `timeout`.
pub(crate) fn run_bounded(binary: &str, args: &[&str], input: &str, timeout: Duration) -> Result<Vec<u8>> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Pipes are drained on their own threads so a chatty child cannot block
    // on a full pipe while we feed or wait for it.
    let mut stdout = child.stdout.take();
    let out_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });
    let mut stderr = child.stderr.take();
    let err_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(pipe) = stderr.as_mut() {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(input.as_bytes()) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    }

    match child.wait_timeout(timeout)? {
        Some(status) => {
            let stdout = out_reader.join().unwrap_or_default();
            let stderr = err_reader.join().unwrap_or_default();
            if status.success() {
                Ok(stdout)
            } else {
                Err(Error::new(
                    ErrorKind::Other,
                    format!("{} exited with {}: {}", binary, status, stderr.trim()),
                ))
            }
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(Error::new(
                ErrorKind::TimedOut,
                format!("{} timed out after {}s", binary, timeout.as_secs()),
            ))
        }
    }
}
