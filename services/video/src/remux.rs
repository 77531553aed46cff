//! Fast-start remuxing with ffmpeg.
//!
//! Rewrites an MP4 so the `moov` atom precedes the media data, letting players
//! start before the whole file has downloaded. Streams are copied, never
//! re-encoded.

use crate::config::MediaConfig;
use crate::process::{run_tool, ToolError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, instrument};

/// Suffix appended to the input path to form the remux output path
pub const OUTPUT_SUFFIX: &str = ".processing";

/// Errors from remuxing a file
#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("empty input file path")]
    InvalidInput,

    #[error("ffmpeg faststart failed: {message}")]
    RemuxFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("processed file missing: {0}")]
    OutputMissing(PathBuf),

    #[error("processed file is empty: {0}")]
    OutputEmpty(PathBuf),
}

impl From<ToolError> for RemuxError {
    fn from(err: ToolError) -> Self {
        RemuxError::RemuxFailed {
            stderr: err.stderr().map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// Produces a fast-start copy of a local MP4
///
/// The returned [`TempPath`] deletes the remuxed file when dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path) -> Result<TempPath, RemuxError>;
}

/// [`Remuxer`] backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    program: String,
    timeout: Duration,
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.remux_timeout())
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    #[instrument(skip(self, input), fields(input = %input.display()))]
    async fn remux(&self, input: &Path) -> Result<TempPath, RemuxError> {
        if input.as_os_str().is_empty() {
            return Err(RemuxError::InvalidInput);
        }

        // Owned before ffmpeg runs so partial output is removed on failure too.
        let output = TempPath::from_path(output_path_for(input));

        run_tool(&self.program, build_args(input, &output), self.timeout)
            .await
            .map_err(|e| {
                metrics::counter!("video.remux.failures").increment(1);
                RemuxError::from(e)
            })?;

        let size = verify_output(&output).await?;

        debug!(output = %output.display(), size_bytes = size, "Remuxed for fast start");

        Ok(output)
    }
}

/// `<input>.processing`
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut path = OsString::from(input.as_os_str());
    path.push(OUTPUT_SUFFIX);
    PathBuf::from(path)
}

/// ffmpeg -y -v error -i <in> -c copy -movflags faststart -f mp4 <out>
fn build_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-v", "error", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());
    args.extend(
        ["-c", "copy", "-movflags", "faststart", "-f", "mp4"]
            .into_iter()
            .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

/// A reported success only counts if the output exists and is non-empty
async fn verify_output(output: &Path) -> Result<u64, RemuxError> {
    let metadata = tokio::fs::metadata(output)
        .await
        .map_err(|_| RemuxError::OutputMissing(output.to_path_buf()))?;

    if metadata.len() == 0 {
        return Err(RemuxError::OutputEmpty(output.to_path_buf()));
    }

    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_for() {
        assert_eq!(
            output_path_for(Path::new("/tmp/upload-abc.mp4")),
            PathBuf::from("/tmp/upload-abc.mp4.processing")
        );
    }

    #[test]
    fn test_build_args_stream_copy() {
        let args = build_args(Path::new("/tmp/in.mp4"), Path::new("/tmp/in.mp4.processing"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(
            args,
            vec![
                "-y",
                "-v",
                "error",
                "-i",
                "/tmp/in.mp4",
                "-c",
                "copy",
                "-movflags",
                "faststart",
                "-f",
                "mp4",
                "/tmp/in.mp4.processing",
            ]
        );
    }

    #[tokio::test]
    async fn test_verify_output() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.mp4");
        assert!(matches!(
            verify_output(&missing).await,
            Err(RemuxError::OutputMissing(_))
        ));

        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            verify_output(&empty).await,
            Err(RemuxError::OutputEmpty(_))
        ));

        let ok = dir.path().join("ok.mp4");
        std::fs::write(&ok, b"ftypisom").unwrap();
        assert_eq!(verify_output(&ok).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_empty_path_rejected_before_running_tool() {
        // The binary does not exist; InvalidInput proves it was never spawned.
        let remuxer = FfmpegRemuxer::new("no-such-ffmpeg", Duration::from_secs(1));
        let err = remuxer.remux(Path::new("")).await.unwrap_err();
        assert!(matches!(err, RemuxError::InvalidInput));
    }

    #[tokio::test]
    async fn test_tool_failure_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"not really an mp4").unwrap();

        let remuxer = FfmpegRemuxer::new("no-such-ffmpeg", Duration::from_secs(1));
        let err = remuxer.remux(&input).await.unwrap_err();

        assert!(matches!(err, RemuxError::RemuxFailed { .. }));
        assert!(!output_path_for(&input).exists());
    }

    /// The output path is ffmpeg's last argument
    #[cfg(unix)]
    const WRITE_LAST_ARG: &str = r#"for out; do :; done"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_output_after_tool_success() {
        use crate::process::tests::fake_tool;

        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            "ffmpeg-empty",
            &format!(r#"{WRITE_LAST_ARG}; : > "$out""#),
        );
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"raw").unwrap();

        let remuxer = FfmpegRemuxer::new(tool.to_string_lossy(), Duration::from_secs(5));
        let err = remuxer.remux(&input).await.unwrap_err();

        assert!(matches!(err, RemuxError::OutputEmpty(_)));
        assert!(!output_path_for(&input).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_after_tool_success() {
        use crate::process::tests::fake_tool;

        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "ffmpeg-noop", "exit 0");
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"raw").unwrap();

        let remuxer = FfmpegRemuxer::new(tool.to_string_lossy(), Duration::from_secs(5));
        let err = remuxer.remux(&input).await.unwrap_err();

        assert!(matches!(err, RemuxError::OutputMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remuxed_output_removed_on_drop() {
        use crate::process::tests::fake_tool;

        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            "ffmpeg-ok",
            &format!(r#"{WRITE_LAST_ARG}; printf faststart > "$out""#),
        );
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"raw").unwrap();

        let remuxer = FfmpegRemuxer::new(tool.to_string_lossy(), Duration::from_secs(5));
        let output = remuxer.remux(&input).await.unwrap();

        assert_eq!(output.to_path_buf(), output_path_for(&input));
        assert_eq!(std::fs::read(&output).unwrap(), b"faststart");

        drop(output);
        assert!(!output_path_for(&input).exists());
    }
}
