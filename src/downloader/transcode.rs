//! Conversion of reassembled transport streams into mp3 via ffmpeg.
//!
//! The converter is a process-boundary collaborator, modeled as a trait so
//! the pipeline can be exercised without ffmpeg on the host.

use std::path::Path;
use std::process::Command;

use crate::errors::{AppError, Result};

pub trait Transcoder: Send + Sync {
    fn transcode_to_mp3(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Shells out to `ffmpeg` from `PATH`. Tries libmp3lame first, then the
/// generic mp3 encoder for builds without lame support.
#[derive(Debug, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode_to_mp3(&self, source: &Path, destination: &Path) -> Result<()> {
        let attempts: [&[&str]; 2] = [
            &["-vn", "-c:a", "libmp3lame", "-q:a", "2"],
            &["-vn", "-c:a", "mp3"],
        ];

        let mut last_error = String::new();
        for codec_args in attempts {
            let output = Command::new("ffmpeg")
                .arg("-y")
                .arg("-i")
                .arg(source)
                .args(codec_args)
                .arg(destination)
                .output()
                .map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound => AppError::Transcode(
                        "ffmpeg is required for HLS conversion to mp3; install ffmpeg and try again"
                            .to_string(),
                    ),
                    _ => AppError::Transcode(format!("failed to run ffmpeg: {}", err)),
                })?;

            if output.status.success() {
                return Ok(());
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            last_error = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
        }

        Err(AppError::Transcode(format!(
            "ffmpeg conversion failed: {}",
            if last_error.is_empty() {
                "unknown ffmpeg error".to_string()
            } else {
                last_error
            }
        )))
    }
}
