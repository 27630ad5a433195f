//! VITS/Piper voices exported to ONNX with a sherpa-style `tokens.txt`.

use super::phonemize::Phonemizer;
use super::{LoadedVoice, VoiceRuntime};
use crate::error::SynthesisError;
use crate::models::ModelDescriptor;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const BOS: char = '^';
const EOS: char = '$';
const PAD: char = '_';

#[derive(Debug, Clone, Copy)]
pub struct InferenceParams {
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    pub threads: usize,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            noise_scale_w: 0.8,
            threads: 1,
        }
    }
}

pub struct OnnxVoiceRuntime {
    phonemizer: Phonemizer,
    params: InferenceParams,
}

impl OnnxVoiceRuntime {
    pub fn new(phonemizer: Phonemizer, params: InferenceParams) -> Self {
        Self { phonemizer, params }
    }
}

impl VoiceRuntime for OnnxVoiceRuntime {
    fn load(&self, dir: &Path, descriptor: &ModelDescriptor) -> Result<Box<dyn LoadedVoice>, SynthesisError> {
        let tokens_path = dir.join(&descriptor.tokens_file);
        let tokens = std::fs::read_to_string(&tokens_path)
            .map_err(|e| SynthesisError::failed(format!("Failed to read {}: {e}", tokens_path.display())))?;
        let symbols = parse_tokens(&tokens)?;

        let model_path = dir.join(&descriptor.model_file);
        info!("Loading ONNX voice from {}", model_path.display());
        let session = Session::builder()
            .map_err(|e| SynthesisError::failed(format!("Failed to create ONNX session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SynthesisError::failed(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(self.params.threads.max(1))
            .map_err(|e| SynthesisError::failed(format!("Failed to set thread count: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| SynthesisError::failed(format!("Failed to load ONNX model: {e}")))?;

        Ok(Box::new(OnnxVoice {
            session,
            symbols,
            phonemizer: self.phonemizer.clone(),
            voice: descriptor.phonemizer_voice.clone(),
            sample_rate: descriptor.sample_rate,
            params: self.params,
        }))
    }
}

struct OnnxVoice {
    session: Session,
    symbols: HashMap<char, i64>,
    phonemizer: Phonemizer,
    voice: String,
    sample_rate: u32,
    params: InferenceParams,
}

impl LoadedVoice for OnnxVoice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&mut self, text: &str, rate: f32) -> Result<Vec<f32>, SynthesisError> {
        let phonemes = self.phonemizer.phonemize(text, &self.voice)?;
        if phonemes.is_empty() {
            return Ok(Vec::new());
        }
        let ids = encode_phonemes(&phonemes, &self.symbols);
        let n = ids.len();

        let input = ndarray::Array2::from_shape_vec((1, n), ids)
            .map_err(|e| SynthesisError::failed(format!("Failed to shape input tensor: {e}")))?;
        let input = Tensor::from_array(input)
            .map_err(|e| SynthesisError::failed(format!("Failed to create input tensor: {e}")))?;
        let lengths = Tensor::from_array(ndarray::Array1::from_vec(vec![n as i64]))
            .map_err(|e| SynthesisError::failed(format!("Failed to create length tensor: {e}")))?;
        let scales = Tensor::from_array(ndarray::Array1::from_vec(vec![
            self.params.noise_scale,
            length_scale(rate),
            self.params.noise_scale_w,
        ]))
        .map_err(|e| SynthesisError::failed(format!("Failed to create scales tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input" => input,
                "input_lengths" => lengths,
                "scales" => scales
            ])
            .map_err(|e| SynthesisError::failed(format!("ONNX inference failed: {e}")))?;

        let first = outputs
            .iter()
            .next()
            .ok_or_else(|| SynthesisError::failed("No output tensor from model"))?;
        let (_shape, audio) = first
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| SynthesisError::failed(format!("Failed to extract audio tensor: {e}")))?;

        let samples: Vec<f32> = audio.to_vec();
        debug!(tokens = n, samples = samples.len(), "VITS inference done");
        Ok(samples)
    }
}

/// VITS takes duration as a length scale, the inverse of speaking rate.
pub fn length_scale(rate: f32) -> f32 {
    if rate <= 0.0 || !rate.is_finite() {
        return 1.0;
    }
    (1.0 / rate).clamp(0.5, 2.0)
}

/// Parse `tokens.txt`: one `<symbol> <id>` pair per line. The space symbol is
/// written as a line starting with a blank.
pub fn parse_tokens(contents: &str) -> Result<HashMap<char, i64>, SynthesisError> {
    let mut symbols = HashMap::new();
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bad_line = || SynthesisError::failed(format!("tokens.txt line {}: '{}'", lineno + 1, line));
        let (symbol, id) = line.rsplit_once(' ').ok_or_else(bad_line)?;
        let id: i64 = id.trim().parse().map_err(|_| bad_line())?;
        let mut chars = symbol.chars();
        let symbol = match (chars.next(), chars.next()) {
            (None, _) => ' ',
            (Some(c), None) => c,
            // Multi-character symbols never come out of the phonemizer.
            (Some(_), Some(_)) => continue,
        };
        symbols.insert(symbol, id);
    }
    for marker in [BOS, EOS, PAD] {
        if !symbols.contains_key(&marker) {
            return Err(SynthesisError::failed(format!("tokens.txt has no '{}' symbol", marker)));
        }
    }
    Ok(symbols)
}

/// `^ _ p1 _ p2 _ ... $`, skipping phonemes the model does not know.
pub fn encode_phonemes(phonemes: &str, symbols: &HashMap<char, i64>) -> Vec<i64> {
    let id = |c: char| symbols.get(&c).copied();
    let (Some(bos), Some(eos), Some(pad)) = (id(BOS), id(EOS), id(PAD)) else {
        return Vec::new();
    };
    let mut ids = Vec::with_capacity(phonemes.len() * 2 + 3);
    ids.push(bos);
    ids.push(pad);
    for phoneme in phonemes.chars().filter_map(id) {
        ids.push(phoneme);
        ids.push(pad);
    }
    ids.push(eos);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: &str = "_ 0\n^ 1\n$ 2\n  3\nh 20\nə 59\nl 24\n";

    #[test]
    fn test_parse_tokens_reads_space_symbol() {
        let symbols = parse_tokens(TOKENS).unwrap();
        assert_eq!(symbols[&' '], 3);
        assert_eq!(symbols[&'ə'], 59);
        assert_eq!(symbols.len(), 7);
    }

    #[test]
    fn test_parse_tokens_requires_markers() {
        assert!(parse_tokens("a 1\nb 2\n").is_err());
        assert!(parse_tokens("_ zero\n").is_err());
    }

    #[test]
    fn test_encode_interleaves_padding() {
        let symbols = parse_tokens(TOKENS).unwrap();
        assert_eq!(
            encode_phonemes("həl", &symbols),
            vec![1, 0, 20, 0, 59, 0, 24, 0, 2]
        );
        // Unknown phoneme 'x' is dropped.
        assert_eq!(encode_phonemes("hx", &symbols), vec![1, 0, 20, 0, 2]);
    }

    #[test]
    fn test_length_scale_inverts_rate() {
        assert_eq!(length_scale(1.0), 1.0);
        assert!((length_scale(1.25) - 0.8).abs() < 1e-6);
        assert_eq!(length_scale(4.0), 0.5);
        assert_eq!(length_scale(0.0), 1.0);
    }
}
