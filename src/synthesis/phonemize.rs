use crate::backends::run_bounded;
use crate::error::SynthesisError;
use std::time::Duration;

/// Text to IPA through `espeak-ng --ipa`, the same front end Piper voices
/// were trained with.
#[derive(Debug, Clone)]
pub struct Phonemizer {
    binary: String,
    timeout: Duration,
}

impl Phonemizer {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// One line of IPA per clause, joined with spaces.
    pub fn phonemize(&self, text: &str, voice: &str) -> Result<String, SynthesisError> {
        let output = run_bounded(&self.binary, &["-q", "--ipa", "--stdin", "-v", voice], text, self.timeout)
            .map_err(|e| SynthesisError::failed(format!("phonemizer: {}", e)))?;
        Ok(normalize_ipa(&String::from_utf8_lossy(&output)))
    }
}

fn normalize_ipa(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_joins_clauses() {
        assert_eq!(normalize_ipa(" həlˈoʊ\n\n wˈɜːld \n"), "həlˈoʊ wˈɜːld");
        assert_eq!(normalize_ipa(""), "");
    }

    #[test]
    fn test_missing_binary_is_synthesis_failure() {
        let p = Phonemizer::new("/nonexistent/espeak-ng", Duration::from_secs(1));
        assert!(matches!(
            p.phonemize("hello", "en-us"),
            Err(SynthesisError::SynthesisFailed { .. })
        ));
    }
}
