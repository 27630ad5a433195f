use super::{find_binary, run_bounded, SpeechCapabilities, SystemSpeech, Voice};
use crate::error::SpeechError;
use crate::locale::Locale;
use crate::playback;
use crate::synthesis::AudioClip;
use async_trait::async_trait;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_WPM: f32 = 175.0;

#[derive(Debug, Clone)]
struct VoiceParams {
    language: String,
    voice: Option<String>,
    rate: f32,
}

impl VoiceParams {
    fn words_per_minute(&self) -> u32 {
        (DEFAULT_WPM * self.rate).clamp(80.0, 450.0).round() as u32
    }
}

/// System speech through the espeak-ng command line. Audio is rendered to
/// WAV and handed back as a clip, so the caller's playback driver stays the
/// only owner of the output device.
pub struct EspeakBackend {
    binary: String,
    recognition_providers: Vec<String>,
    timeout: Duration,
    params: Mutex<VoiceParams>,
}

impl EspeakBackend {
    pub fn new(
        binary: impl Into<String>,
        recognition_providers: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            recognition_providers,
            timeout,
            params: Mutex::new(VoiceParams {
                language: "en-us".to_string(),
                voice: None,
                rate: 1.0,
            }),
        }
    }

    fn params(&self) -> MutexGuard<'_, VoiceParams> {
        self.params.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn synthesize(binary: &str, params: &VoiceParams, text: &str, timeout: Duration) -> Result<AudioClip, SpeechError> {
        let voice = params.voice.as_deref().unwrap_or(&params.language);
        let wpm = params.words_per_minute().to_string();
        let wav = run_bounded(binary, &["--stdin", "--stdout", "-v", voice, "-s", &wpm], text, timeout)
            .map_err(|e| SpeechError::Backend(e.to_string()))?;
        decode_wav(&wav)
    }
}

/// espeak-ng writes a streaming WAV header whose data length may not match
/// what follows, so samples are read until the first error.
fn decode_wav(bytes: &[u8]) -> Result<AudioClip, SpeechError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::Backend(format!("invalid WAV from espeak: {}", e)))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map_while(Result::ok)
                .map(|s| s as f32 / scale)
                .collect()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().map_while(Result::ok).collect(),
    };
    if samples.is_empty() {
        return Err(SpeechError::Backend("espeak produced no audio".to_string()));
    }
    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Parse `espeak-ng --voices` output:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US           (en 10)
/// ```
fn parse_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            cols.next()?.parse::<u32>().ok()?;
            let language = cols.next()?;
            let _age_gender = cols.next()?;
            let name = cols.next()?;
            Some(Voice {
                id: language.to_string(),
                name: name.replace('_', " "),
                language: language.to_string(),
                requires_network: false,
            })
        })
        .collect()
}

impl SpeechCapabilities for EspeakBackend {
    fn recognition_engine(&self) -> Option<String> {
        self.recognition_providers
            .iter()
            .find(|provider| find_binary(provider).is_some())
            .cloned()
    }

    fn active_synthesis_engine(&self) -> Option<String> {
        let path = find_binary(&self.binary)?;
        Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn is_engine_installed(&self, engine: &str) -> bool {
        find_binary(engine).is_some()
    }

    fn is_language_available(&self, locale: &Locale) -> bool {
        self.list_voices().iter().any(|v| v.speaks(locale))
    }

    fn output_device(&self) -> Option<String> {
        playback::default_output_device_name()
    }
}

#[async_trait]
impl SystemSpeech for EspeakBackend {
    fn id(&self) -> &str {
        "espeak-ng"
    }

    fn set_locale(&self, locale: &Locale) -> bool {
        let voices = self.list_voices();
        let Some(voice) = voices.iter().find(|v| v.speaks(locale)) else {
            debug!(locale = %locale, "espeak has no voice for locale");
            return false;
        };
        // Prefer the exact regional variant when espeak ships one.
        let wanted = locale.to_string().to_ascii_lowercase();
        let language = voices
            .iter()
            .find(|v| v.language.eq_ignore_ascii_case(&wanted))
            .unwrap_or(voice)
            .language
            .clone();
        let mut params = self.params();
        params.language = language;
        params.voice = None;
        true
    }

    fn set_rate(&self, rate: f32) {
        if rate.is_finite() && rate > 0.0 {
            self.params().rate = rate;
        }
    }

    fn list_voices(&self) -> Vec<Voice> {
        match run_bounded(&self.binary, &["--voices"], "", self.timeout) {
            Ok(out) => parse_voices(&String::from_utf8_lossy(&out)),
            Err(e) => {
                warn!(error = %e, "Could not list espeak voices");
                Vec::new()
            }
        }
    }

    fn set_voice(&self, voice_id: Option<&str>) {
        self.params().voice = voice_id.map(str::to_string);
    }

    async fn render(&self, text: &str) -> Result<AudioClip, SpeechError> {
        let params = self.params().clone();
        let binary = self.binary.clone();
        let timeout = self.timeout;
        let text = text.to_string();
        debug!(voice = ?params.voice, language = %params.language, wpm = params.words_per_minute(), "espeak rendering");

        tokio::task::spawn_blocking(move || Self::synthesize(&binary, &params, &text, timeout))
            .await
            .map_err(|e| SpeechError::Backend(format!("espeak task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 2  en-gb           --/M      English_(Great_Britain) gmw/en           (en 2)
 5  en-us           --/M      English_(America)  gmw/en-US           (en 3)
 5  ja              --/M      Japanese           jpx/ja
";

    #[test]
    fn test_parse_voice_listing() {
        let voices = parse_voices(LISTING);
        assert_eq!(voices.len(), 4);
        assert_eq!(voices[2].language, "en-us");
        assert_eq!(voices[2].name, "English (America)");
        assert!(voices.iter().all(|v| !v.requires_network));
    }

    #[test]
    fn test_rate_maps_to_wpm() {
        let mut params = VoiceParams {
            language: "en-us".into(),
            voice: None,
            rate: 1.0,
        };
        assert_eq!(params.words_per_minute(), 175);
        params.rate = 1.2;
        assert_eq!(params.words_per_minute(), 210);
        params.rate = 10.0;
        assert_eq!(params.words_per_minute(), 450);
    }

    #[test]
    fn test_decode_wav_to_float() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
            for s in [0i16, 16384, -16384] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        let clip = decode_wav(buf.get_ref()).unwrap();
        assert_eq!(clip.sample_rate, 22050);
        assert_eq!(clip.samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"not a wav").is_err());
    }
}
