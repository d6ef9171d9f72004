//! # Audio Loading
//!
//! Reads WAV files and normalizes them to what the model expects: mono
//! 32-bit float samples at 16 kHz in the range [-1.0, 1.0]. Multi-channel
//! input is downmixed by averaging; other sample rates are linearly
//! resampled.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Sample rate the models are trained on.
pub const SAMPLE_RATE: u32 = 16_000;

/// Load a WAV file as mono f32 samples at [`SAMPLE_RATE`].
pub fn load_pcm(path: &Path) -> Result<Vec<f32>> {
    let mut file = File::open(path)
        .map_err(|e| anyhow!("cannot open audio file {}: {}", path.display(), e))?;
    let (header, data) = wav::read(&mut file)
        .map_err(|e| anyhow!("cannot parse WAV file {}: {}", path.display(), e))?;

    let samples = to_f32(data)?;
    if samples.is_empty() {
        return Err(anyhow!("audio file {} contains no samples", path.display()));
    }

    let mono = downmix(&samples, header.channel_count as usize);
    let resampled = resample(&mono, header.sampling_rate, SAMPLE_RATE);
    debug!(
        file = %path.display(),
        channels = header.channel_count,
        rate = header.sampling_rate,
        seconds = resampled.len() as f64 / SAMPLE_RATE as f64,
        "audio decoded"
    );
    Ok(resampled)
}

fn to_f32(data: wav::BitDepth) -> Result<Vec<f32>> {
    let samples = match data {
        wav::BitDepth::Eight(v) => v
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(v) => v.into_iter().map(|s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(v) => v
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(v) => v,
        wav::BitDepth::Empty => Vec::new(),
    };
    Ok(samples)
}

/// Average interleaved channels into one.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear interpolation resampler. Good enough for speech input; the models
/// are robust to the mild aliasing this introduces.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos.floor() as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        let mono = [0.1, 0.2, 0.3];
        assert_eq!(downmix(&mono, 1), mono.to_vec());
    }

    #[test]
    fn test_resample_halves_length_for_double_rate() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample(&samples, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        // Every other sample of a linear ramp survives exactly
        assert_eq!(out[1], 2.0);
        assert_eq!(out[10], 20.0);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn test_sixteen_bit_scaling() {
        let out = to_f32(wav::BitDepth::Sixteen(vec![0, i16::MAX, i16::MIN])).unwrap();
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 1.0).abs() < 1e-3);
        assert_eq!(out[2], -1.0);
    }
}
