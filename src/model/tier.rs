//! # Model Tiers
//!
//! The fixed set of Whisper model sizes a job may request, with their
//! HuggingFace repositories and rough resource characteristics.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Available Whisper model sizes.
///
/// Larger tiers are more accurate but slower to load and run; the large
/// tier tracks the v3 checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Tiny,
    Base,
    Small,
    Medium,
    LargeV3,
}

impl ModelTier {
    /// All tiers, smallest first.
    pub const ALL: [ModelTier; 5] = [
        ModelTier::Tiny,
        ModelTier::Base,
        ModelTier::Small,
        ModelTier::Medium,
        ModelTier::LargeV3,
    ];

    /// HuggingFace model repository holding this tier's weights.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "openai/whisper-tiny",
            ModelTier::Base => "openai/whisper-base",
            ModelTier::Small => "openai/whisper-small",
            ModelTier::Medium => "openai/whisper-medium",
            ModelTier::LargeV3 => "openai/whisper-large-v3",
        }
    }

    /// Approximate weight size in MB, for the model listing endpoint.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelTier::Tiny => 39,
            ModelTier::Base => 74,
            ModelTier::Small => 244,
            ModelTier::Medium => 769,
            ModelTier::LargeV3 => 1550,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "Fastest, basic accuracy",
            ModelTier::Base => "Fast, good for testing",
            ModelTier::Small => "Balanced speed and accuracy",
            ModelTier::Medium => "Good accuracy, handles technical vocabulary",
            ModelTier::LargeV3 => "Best accuracy, slower processing",
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelTier::Tiny),
            "base" => Ok(ModelTier::Base),
            "small" => Ok(ModelTier::Small),
            "medium" => Ok(ModelTier::Medium),
            "large" | "large-v3" => Ok(ModelTier::LargeV3),
            _ => Err(anyhow!("Unknown model tier: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelTier::Tiny => "tiny",
            ModelTier::Base => "base",
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::LargeV3 => "large-v3",
        };
        write!(f, "{}", name)
    }
}
