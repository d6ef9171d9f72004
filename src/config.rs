//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_JOBS__MAX_CONCURRENT, ...)
//!    with `__` separating the section from the key, so multi-word keys
//!    like `max_concurrent` stay intact
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are also honored without the APP_ prefix because most
//! deployment platforms set them directly.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub transcription: TranscriptionSettings,
    pub jobs: JobsConfig,
}

/// Server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Directories the service reads from and writes to.
///
/// All three are created on startup if missing. `models_dir` holds locally
/// persisted model weights so a once-downloaded model never has to be
/// fetched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where uploaded audio files land
    pub upload_dir: PathBuf,
    /// Where transcript and subtitle artifacts are written
    pub output_dir: PathBuf,
    /// Local persistence for downloaded model weights
    pub models_dir: PathBuf,
}

/// Fixed transcription options applied to every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    /// Model tier used when a submission does not name one
    pub default_model: String,
    /// Target language hint passed to the engine (ISO 639-1)
    pub language: String,
}

/// Job orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Upper bound on concurrently running executors. Jobs submitted beyond
    /// this limit stay queued until a slot frees up; nothing is rejected.
    pub max_concurrent: usize,
    /// Age in hours after which finished job and batch records are purged
    pub retention_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            paths: PathsConfig {
                upload_dir: PathBuf::from("uploads"),
                output_dir: PathBuf::from("transcripts"),
                models_dir: PathBuf::from("models"),
            },
            transcription: TranscriptionSettings {
                default_model: "small".to_string(),
                language: "zh".to_string(),
            },
            jobs: JobsConfig {
                max_concurrent: 2,
                retention_hours: 24,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration in priority order: defaults, then config.toml
    /// (optional), then APP_-prefixed environment variables, then the
    /// HOST/PORT platform overrides.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration values make sense before the server
    /// starts taking requests.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.jobs.max_concurrent == 0 {
            return Err(anyhow::anyhow!(
                "jobs.max_concurrent must be greater than 0"
            ));
        }

        if self.jobs.retention_hours == 0 {
            return Err(anyhow::anyhow!(
                "jobs.retention_hours must be greater than 0"
            ));
        }

        if self.transcription.language.is_empty() {
            return Err(anyhow::anyhow!("transcription.language cannot be empty"));
        }

        Ok(())
    }

    /// Create the upload, output, and models directories if they are missing.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.paths.upload_dir,
            &self.paths.output_dir,
            &self.paths.models_dir,
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("failed to create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }

    /// Retention window for the purge endpoint.
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.jobs.retention_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jobs.retention_hours, 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.jobs.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_reaches_multi_word_keys() {
        env::set_var("APP_JOBS__MAX_CONCURRENT", "7");
        env::set_var("APP_SERVER__HOST", "0.0.0.0");
        let config = AppConfig::load().unwrap();
        env::remove_var("APP_JOBS__MAX_CONCURRENT");
        env::remove_var("APP_SERVER__HOST");

        assert_eq!(config.jobs.max_concurrent, 7);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_retention_window() {
        let config = AppConfig::default();
        assert_eq!(config.retention_window(), chrono::Duration::hours(24));
    }
}
