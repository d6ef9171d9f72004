//! Job orchestration: the registry and lifecycle state machine, per-job
//! executors, batch submission, and transcript artifact rendering.

pub mod artifacts;
pub mod batch;
pub mod executor;
pub mod registry;

pub use executor::JobRunner;
pub use registry::{JobRegistry, JobSpec, JobStatus};

use crate::error::{AppError, AppResult};
use std::path::Path;

/// Validate that a submitted file reference is a plain file name inside the
/// upload directory. Anything with a directory component, a traversal
/// segment, or an absolute path is rejected so a job can never read outside
/// the upload directory.
pub fn validate_plain_file_name(raw: &str) -> AppResult<&str> {
    let trimmed = raw.trim();
    let is_plain = !trimmed.is_empty()
        && !trimmed.contains('\\')
        && Path::new(trimmed).file_name().and_then(|n| n.to_str()) == Some(trimmed);
    if is_plain {
        Ok(trimmed)
    } else {
        Err(AppError::ValidationError(format!(
            "invalid file reference: {}",
            raw
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_file_names_pass() {
        assert_eq!(validate_plain_file_name("meeting.wav").unwrap(), "meeting.wav");
        assert_eq!(validate_plain_file_name("  spaced.wav ").unwrap(), "spaced.wav");
    }

    #[test]
    fn test_escaping_references_are_rejected() {
        for bad in ["../x.wav", "/etc/passwd", "a/b.wav", "..", "", "..\\x.wav"] {
            assert!(
                matches!(validate_plain_file_name(bad), Err(AppError::ValidationError(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}
