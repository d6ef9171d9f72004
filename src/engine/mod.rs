//! # Transcription Engine Seam
//!
//! The orchestration core treats the actual speech-to-text engine as an
//! external collaborator behind two traits: [`SpeechEngine`] turns a model
//! tier into loaded weights, and [`LoadedSpeechModel`] turns an audio file
//! into timed segments. The model cache and job executors only ever talk to
//! these traits, which is also what makes them testable with an instrumented
//! stub engine.

pub mod audio;
pub mod whisper;

use crate::model::tier::ModelTier;
use anyhow::Result;
use candle_core::Device;
use std::path::Path;

pub use whisper::WhisperEngine;

/// One timed piece of transcribed speech.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Segment {
    /// Start offset in seconds from the beginning of the audio
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Fixed per-job transcription options. Numeric precision is not an option
/// here: the engine picks it when the model is loaded, based on the device.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Target language hint (ISO 639-1 code like "zh", "en")
    pub language: String,
    /// Translate to English instead of transcribing in place
    pub translate: bool,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: "zh".to_string(),
            translate: false,
        }
    }
}

/// Loads models. Implementations prefer locally persisted weights and fall
/// back to a remote fetch, persisting what they downloaded for next time.
///
/// `load` is blocking (weights I/O plus device upload) and is always invoked
/// from a blocking thread by the model cache.
pub trait SpeechEngine: Send + Sync {
    fn load(&self, tier: ModelTier, device: &Device) -> Result<Box<dyn LoadedSpeechModel>>;
}

/// A loaded model ready for inference. Handles to it are shared between
/// concurrently running jobs, so implementations must be safe to call from
/// multiple threads.
pub trait LoadedSpeechModel: Send + Sync {
    /// The tier this model was loaded as. The cache verifies this against
    /// the requested tier after every load.
    fn tier(&self) -> ModelTier;

    /// Transcribe an audio file into ordered, timed segments. Compute-bound;
    /// executors call this from a blocking thread.
    fn transcribe(&self, audio: &Path, options: &TranscribeOptions) -> Result<Vec<Segment>>;
}
