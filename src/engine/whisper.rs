//! # Whisper Engine
//!
//! Candle-backed implementation of the engine seam. Loading prefers weights
//! already persisted under the models directory and falls back to a
//! HuggingFace fetch, copying what it downloaded next to the other tiers so
//! the next load is offline. Inference runs greedy decoding over 30 second
//! windows, one output segment per window.

use crate::device;
use crate::engine::{audio, LoadedSpeechModel, Segment, SpeechEngine, TranscribeOptions};
use crate::model::tier::ModelTier;
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

const SOT_TOKEN: u32 = 50258;
const EOT_TOKEN: u32 = 50257;
const TRANSCRIBE_TOKEN: u32 = 50359;
const TRANSLATE_TOKEN: u32 = 50358;
const NO_TIMESTAMPS_TOKEN: u32 = 50363;

/// Samples per inference window (30 seconds at 16 kHz).
const WINDOW_SAMPLES: usize = 30 * audio::SAMPLE_RATE as usize;

/// Upper bound on generated tokens per window.
const MAX_DECODE_TOKENS: usize = 224;

/// Loads Whisper models from disk or HuggingFace.
pub struct WhisperEngine {
    models_dir: PathBuf,
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl WhisperEngine {
    pub fn new(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    /// Resolve the three files a tier needs, fetching and persisting any
    /// that are missing locally.
    fn ensure_local_files(&self, tier: ModelTier) -> Result<ModelFiles> {
        let dir = self.models_dir.join(tier.to_string());
        let files = ModelFiles {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        };
        if files.config.is_file() && files.tokenizer.is_file() && files.weights.is_file() {
            debug!(model = %tier, dir = %dir.display(), "using locally persisted weights");
            return Ok(files);
        }

        info!(model = %tier, repo = tier.repo_name(), "fetching model files from HuggingFace");
        std::fs::create_dir_all(&dir)?;
        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_progress(false)
            .build()
            .map_err(|e| anyhow!("cannot initialize the HuggingFace client: {}", e))?;
        let repo = api.model(tier.repo_name().to_string());

        for (remote, local) in [
            ("config.json", &files.config),
            ("tokenizer.json", &files.tokenizer),
            ("model.safetensors", &files.weights),
        ] {
            if local.is_file() {
                continue;
            }
            let fetched = repo
                .get(remote)
                .map_err(|e| anyhow!("failed to fetch {} from {}: {}", remote, tier.repo_name(), e))?;
            std::fs::copy(&fetched, local)?;
            debug!(file = remote, dest = %local.display(), "model file persisted");
        }
        Ok(files)
    }
}

impl SpeechEngine for WhisperEngine {
    fn load(&self, tier: ModelTier, device: &Device) -> Result<Box<dyn LoadedSpeechModel>> {
        let start = std::time::Instant::now();
        let files = self.ensure_local_files(tier)?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&files.config)?)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;
        let mel_filters = mel_filter_bank(config.num_mel_bins);

        // Half precision on accelerators, full precision on CPU
        let dtype = if device::is_accelerator(device) {
            DType::F16
        } else {
            m::DTYPE
        };
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights], dtype, device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        info!(
            model = %tier,
            dtype = ?dtype,
            seconds = start.elapsed().as_secs_f64(),
            "model weights loaded"
        );
        Ok(Box::new(WhisperSpeechModel {
            tier,
            device: device.clone(),
            dtype,
            config,
            tokenizer,
            mel_filters,
            model: Mutex::new(model),
        }))
    }
}

/// A loaded model plus everything inference needs. Decoding mutates the
/// model's key/value cache, so the model sits behind a mutex and windows
/// from concurrent jobs are serialized through it.
pub struct WhisperSpeechModel {
    tier: ModelTier,
    device: Device,
    dtype: DType,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    model: Mutex<m::model::Whisper>,
}

impl LoadedSpeechModel for WhisperSpeechModel {
    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn transcribe(&self, audio_path: &Path, options: &TranscribeOptions) -> Result<Vec<Segment>> {
        let pcm = audio::load_pcm(audio_path)?;
        let total_seconds = pcm.len() as f64 / audio::SAMPLE_RATE as f64;
        debug!(
            file = %audio_path.display(),
            seconds = total_seconds,
            language = %options.language,
            "transcription started"
        );

        let mut segments = Vec::new();
        for (index, window) in split_windows(&pcm).iter().enumerate() {
            let text = self.decode_window(window, options)?;
            if text.is_empty() {
                continue;
            }
            let start = (index * WINDOW_SAMPLES) as f64 / audio::SAMPLE_RATE as f64;
            let end = start + window.len() as f64 / audio::SAMPLE_RATE as f64;
            segments.push(Segment::new(start, end, text));
        }
        Ok(segments)
    }
}

impl WhisperSpeechModel {
    /// Greedy decode of one 30 second window.
    fn decode_window(&self, window: &[f32], options: &TranscribeOptions) -> Result<String> {
        let mel = m::audio::pcm_to_mel(&self.config, window, &self.mel_filters);
        let mel_len = mel.len();
        let n_mels = self.config.num_mel_bins;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?
            .to_dtype(self.dtype)?;

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("inference state poisoned by a previous panic"))?;
        let audio_features = model.encoder.forward(&mel, true)?;

        let mut tokens = vec![SOT_TOKEN];
        match language_token(&options.language) {
            Some(lang) => tokens.push(lang),
            None => warn!(language = %options.language, "no token for language, letting the model detect it"),
        }
        tokens.push(if options.translate {
            TRANSLATE_TOKEN
        } else {
            TRANSCRIBE_TOKEN
        });
        tokens.push(NO_TIMESTAMPS_TOKEN);
        let prompt_len = tokens.len();

        for i in 0..MAX_DECODE_TOKENS {
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let hidden = model.decoder.forward(&input, &audio_features, i == 0)?;
            let logits = model.decoder.final_linear(&hidden)?;
            let (_, seq_len, _) = logits.dims3()?;
            let last = logits.i((0, seq_len - 1))?;
            let next = last.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next == EOT_TOKEN {
                break;
            }
            if is_repetitive(&tokens[prompt_len..], next) {
                warn!("stopping window decode on repetition");
                break;
            }
            tokens.push(next);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }
}

/// Split normalized PCM into 30 second windows; the last one may be short.
fn split_windows(pcm: &[f32]) -> Vec<&[f32]> {
    pcm.chunks(WINDOW_SAMPLES).collect()
}

/// Triangular mel filter bank over the 201 FFT frequency bins Whisper uses
/// at 16 kHz, laid out as `n_mels` rows.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    const N_FREQS: usize = 201; // n_fft 400 at 16 kHz
    const F_MAX: f32 = 8_000.0; // Nyquist

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(F_MAX);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let freq_of_bin = |bin: usize| bin as f32 * F_MAX / (N_FREQS - 1) as f32;

    let mut filters = vec![0.0f32; n_mels * N_FREQS];
    for row in 0..n_mels {
        let (left, center, right) = (points[row], points[row + 1], points[row + 2]);
        for bin in 0..N_FREQS {
            let f = freq_of_bin(bin);
            let weight = if f <= center {
                (f - left) / (center - left)
            } else {
                (right - f) / (right - center)
            };
            filters[row * N_FREQS + bin] = weight.max(0.0);
        }
    }
    filters
}

/// Token id of the language hint, when the hint is one the decoder knows.
fn language_token(language: &str) -> Option<u32> {
    match language.to_lowercase().as_str() {
        "en" | "english" => Some(50259),
        "zh" | "chinese" => Some(50260),
        "de" | "german" => Some(50261),
        "es" | "spanish" => Some(50262),
        "ru" | "russian" => Some(50263),
        "ko" | "korean" => Some(50264),
        "fr" | "french" => Some(50265),
        "ja" | "japanese" => Some(50266),
        "pt" | "portuguese" => Some(50267),
        "it" | "italian" => Some(50274),
        _ => None,
    }
}

/// Bail out of a decode loop that has started looping on itself: three
/// identical tokens in a row, or the same 3-token pattern twice.
fn is_repetitive(generated: &[u32], next: u32) -> bool {
    if generated.len() >= 3 {
        let tail = &generated[generated.len() - 3..];
        if tail == [next, next, next] {
            return true;
        }
    }
    if generated.len() >= 6 {
        let last_3 = &generated[generated.len() - 3..];
        let prev_3 = &generated[generated.len() - 6..generated.len() - 3];
        if last_3 == prev_3 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_filter_bank_shape_and_range() {
        let filters = mel_filter_bank(80);
        assert_eq!(filters.len(), 80 * 201);
        assert!(filters.iter().all(|&w| (0.0..=1.0).contains(&w)));
        // Every filter covers at least one bin
        for row in 0..80 {
            let sum: f32 = filters[row * 201..(row + 1) * 201].iter().sum();
            assert!(sum > 0.0, "filter {} is empty", row);
        }
    }

    #[test]
    fn test_split_windows() {
        let pcm = vec![0.0f32; WINDOW_SAMPLES + 1000];
        let windows = split_windows(&pcm);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].len(), WINDOW_SAMPLES);
        assert_eq!(windows[1].len(), 1000);
    }

    #[test]
    fn test_language_tokens() {
        assert_eq!(language_token("zh"), Some(50260));
        assert_eq!(language_token("English"), Some(50259));
        assert_eq!(language_token("klingon"), None);
    }

    #[test]
    fn test_repetition_detection() {
        assert!(is_repetitive(&[1, 2, 7, 7, 7], 7));
        assert!(is_repetitive(&[9, 1, 2, 3, 1, 2, 3], 4));
        assert!(!is_repetitive(&[1, 2, 3, 4, 5], 6));
        assert!(!is_repetitive(&[7, 7], 7));
    }
}
