//! # Transcript Artifacts
//!
//! Renders the two output files a completed job produces: a plain text
//! transcript and a SubRip subtitle file. Rendering is pure; writing is the
//! only fallible part and cleans up after itself so a failed job never
//! leaves half of its outputs behind.

use crate::engine::Segment;
use crate::error::{AppError, AppResult};
use crate::model::tier::ModelTier;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Seconds → `HH:MM:SS,mmm` as SubRip wants it.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// Plain text transcript: a model banner, a blank line, then one trimmed
/// line per segment.
pub fn render_transcript(model: ModelTier, segments: &[Segment]) -> String {
    let mut out = format!("# model: {}\n\n", model);
    for segment in segments {
        out.push_str(segment.text.trim());
        out.push('\n');
    }
    out
}

/// SubRip subtitles. Cue 1 is a one-second banner naming the model that
/// produced the transcript; content cues start at index 2.
pub fn render_subtitles(model: ModelTier, segments: &[Segment]) -> String {
    let mut out = format!(
        "1\n00:00:00,000 --> 00:00:01,000\nmodel: {}\n\n",
        model
    );
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 2,
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.text.trim()
        ));
    }
    out
}

/// Write both artifacts for a job into `output_dir` and return the map of
/// artifact kind to file name.
///
/// The text file is written first, then the subtitles. If either write
/// fails, whatever was already on disk is removed before the error is
/// returned, keeping "outputs exist" equivalent to "job completed".
pub fn write_artifacts(
    output_dir: &Path,
    base_name: &str,
    model: ModelTier,
    segments: &[Segment],
) -> AppResult<HashMap<String, String>> {
    let txt_name = format!("{}.txt", base_name);
    let srt_name = format!("{}.srt", base_name);
    let txt_path = output_dir.join(&txt_name);
    let srt_path = output_dir.join(&srt_name);

    write_or_clean(&txt_path, &render_transcript(model, segments), &[])?;
    write_or_clean(&srt_path, &render_subtitles(model, segments), &[&txt_path])?;

    debug!(txt = %txt_path.display(), srt = %srt_path.display(), "artifacts written");
    Ok(HashMap::from([
        ("txt".to_string(), txt_name),
        ("srt".to_string(), srt_name),
    ]))
}

fn write_or_clean(path: &PathBuf, content: &str, partials: &[&PathBuf]) -> AppResult<()> {
    if let Err(e) = std::fs::write(path, content) {
        let _ = std::fs::remove_file(path);
        for partial in partials {
            let _ = std::fs::remove_file(partial);
        }
        return Err(AppError::IoFailure(format!(
            "failed to write {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 1.0, " hello "),
            Segment::new(1.0, 2.5, "world"),
        ]
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(1.5), "00:00:01,500");
        assert_eq!(format_timestamp(61.25), "00:01:01,250");
        assert_eq!(format_timestamp(3661.007), "01:01:01,007");
        // Negative inputs clamp instead of underflowing
        assert_eq!(format_timestamp(-2.0), "00:00:00,000");
    }

    #[test]
    fn test_transcript_layout() {
        let text = render_transcript(ModelTier::Small, &fixture());
        assert_eq!(text, "# model: small\n\nhello\nworld\n");
    }

    #[test]
    fn test_subtitle_layout() {
        let srt = render_subtitles(ModelTier::Small, &fixture());
        let expected = "1\n00:00:00,000 --> 00:00:01,000\nmodel: small\n\n\
                        2\n00:00:00,000 --> 00:00:01,000\nhello\n\n\
                        3\n00:00:01,000 --> 00:00:02,500\nworld\n\n";
        assert_eq!(srt, expected);
    }

    #[test]
    fn test_write_artifacts_produces_both_files() {
        let dir = std::env::temp_dir().join(format!("artifacts_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let outputs = write_artifacts(&dir, "meeting", ModelTier::Base, &fixture()).unwrap();
        assert_eq!(outputs.get("txt").unwrap(), "meeting.txt");
        assert_eq!(outputs.get("srt").unwrap(), "meeting.srt");
        assert!(dir.join("meeting.txt").exists());
        assert!(dir.join("meeting.srt").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_write_cleans_partials() {
        // Nonexistent directory makes both writes fail
        let dir = std::env::temp_dir().join("artifacts_test_missing_dir");
        let result = write_artifacts(&dir, "x", ModelTier::Base, &fixture());
        assert!(matches!(result, Err(AppError::IoFailure(_))));
        assert!(!dir.join("x.txt").exists());
    }
}
