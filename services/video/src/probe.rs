//! Stream geometry extraction with ffprobe.

use crate::config::MediaConfig;
use crate::orientation::{classify, Orientation};
use crate::process::{run_tool, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from inspecting a media file
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ProbeOutputInvalid(#[from] serde_json::Error),

    #[error("no video stream with positive width and height found")]
    NoVideoStream,
}

impl From<ToolError> for ProbeError {
    fn from(err: ToolError) -> Self {
        ProbeError::ProbeFailed {
            stderr: err.stderr().map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// Pixel dimensions of the first usable video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
}

impl StreamGeometry {
    pub fn orientation(&self) -> Orientation {
        classify(self.width, self.height)
    }
}

/// Reads stream geometry from a local media file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<StreamGeometry, ProbeError>;
}

/// `ffprobe -show_streams` JSON output, reduced to what we read
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
}

/// [`MediaInspector`] backed by the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    program: String,
    timeout: Duration,
}

impl FfprobeInspector {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.ffprobe_path.clone(), config.probe_timeout())
    }
}

impl FfprobeInspector {
    async fn probe(&self, path: &Path) -> Result<StreamGeometry, ProbeError> {
        let output = run_tool(
            &self.program,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-print_format"),
                OsStr::new("json"),
                OsStr::new("-show_streams"),
                path.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        parse_geometry(&output.stdout)
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn inspect(&self, path: &Path) -> Result<StreamGeometry, ProbeError> {
        let geometry = self.probe(path).await.map_err(|e| {
            metrics::counter!("video.probe.failures").increment(1);
            e
        })?;

        debug!(
            width = geometry.width,
            height = geometry.height,
            "Probed video stream"
        );

        Ok(geometry)
    }
}

/// Pick the first video stream whose width and height are both positive
fn parse_geometry(stdout: &[u8]) -> Result<StreamGeometry, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .find_map(|s| {
            let width = u32::try_from(s.width?).ok().filter(|w| *w > 0)?;
            let height = u32::try_from(s.height?).ok().filter(|h| *h > 0)?;
            Some(StreamGeometry { width, height })
        })
        .ok_or(ProbeError::NoVideoStream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_video_stream() {
        let json = br#"{
            "streams": [
                {"index": 0, "codec_type": "audio", "codec_name": "aac"},
                {"index": 1, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
                {"index": 2, "codec_type": "video", "codec_name": "mjpeg", "width": 320, "height": 180}
            ]
        }"#;

        let geometry = parse_geometry(json).unwrap();
        assert_eq!(
            geometry,
            StreamGeometry {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(geometry.orientation(), Orientation::Landscape);
    }

    #[test]
    fn test_skips_streams_without_dimensions() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 0, "height": 0},
                {"codec_type": "video"},
                {"codec_type": "video", "width": 1080, "height": 1920}
            ]
        }"#;

        let geometry = parse_geometry(json).unwrap();
        assert_eq!(geometry.width, 1080);
        assert_eq!(geometry.height, 1920);
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_geometry(json),
            Err(ProbeError::NoVideoStream)
        ));

        assert!(matches!(
            parse_geometry(b"{}"),
            Err(ProbeError::NoVideoStream)
        ));
    }

    #[test]
    fn test_invalid_output() {
        assert!(matches!(
            parse_geometry(b"not json"),
            Err(ProbeError::ProbeOutputInvalid(_))
        ));
    }

    #[test]
    fn test_tool_error_carries_stderr() {
        let err = ProbeError::from(ToolError::NonZeroExit {
            program: "ffprobe".to_string(),
            exit_code: Some(1),
            stderr: "moov atom not found".to_string(),
        });

        match err {
            ProbeError::ProbeFailed { message, stderr } => {
                assert!(message.contains("ffprobe"));
                assert_eq!(stderr.as_deref(), Some("moov atom not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_every_failure_is_counted() {
        use crate::process::tests::fake_tool;

        let dir = tempfile::tempdir().unwrap();
        let no_video = fake_tool(dir.path(), "no-video", r#"echo '{"streams":[{"codec_type":"audio"}]}'"#);
        let garbage = fake_tool(dir.path(), "garbage", "echo not-json");
        let good = fake_tool(
            dir.path(),
            "good",
            r#"echo '{"streams":[{"codec_type":"video","width":1920,"height":1080}]}'"#,
        );

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let input = Path::new("/tmp/upload.mp4");
                let timeout = Duration::from_secs(5);

                let err = FfprobeInspector::new(no_video.to_string_lossy(), timeout)
                    .inspect(input)
                    .await
                    .unwrap_err();
                assert!(matches!(err, ProbeError::NoVideoStream));

                let err = FfprobeInspector::new(garbage.to_string_lossy(), timeout)
                    .inspect(input)
                    .await
                    .unwrap_err();
                assert!(matches!(err, ProbeError::ProbeOutputInvalid(_)));

                let geometry = FfprobeInspector::new(good.to_string_lossy(), timeout)
                    .inspect(input)
                    .await
                    .unwrap();
                assert_eq!(geometry.orientation(), Orientation::Landscape);
            })
        });

        assert!(handle.render().contains("video_probe_failures 2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_binary_is_probe_failure() {
        let inspector = FfprobeInspector::new("no-such-ffprobe", Duration::from_secs(1));
        let err = inspector.inspect(Path::new("/tmp/x.mp4")).await.unwrap_err();
        assert!(matches!(err, ProbeError::ProbeFailed { .. }));
    }
}
