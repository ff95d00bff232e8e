use crate::error::RecordingError;
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Encodes fixed-size RGB frames into one video file.
#[async_trait]
pub trait VideoSink: Send {
    async fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError>;

    /// Flushes and closes the file.
    async fn finish(self: Box<Self>) -> Result<(), RecordingError>;
}

#[async_trait]
pub trait VideoSinkFactory: Send + Sync {
    async fn create(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VideoSink>, RecordingError>;
}

/// Pipes raw frames into an ffmpeg H.264 encoder.
#[derive(Debug, Clone)]
pub struct FfmpegSinkFactory {
    ffmpeg: PathBuf,
}

impl FfmpegSinkFactory {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    fn args(path: &Path, width: u32, height: u32, fps: u32) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", width, height),
            "-r".into(),
            fps.to_string(),
            "-i".into(),
            "-".into(),
            "-an".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            path.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl VideoSinkFactory for FfmpegSinkFactory {
    async fn create(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VideoSink>, RecordingError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(Self::args(path, width, height, fps))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RecordingError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;
        let stdin = child.stdin.take();
        Ok(Box::new(FfmpegVideoSink {
            child,
            stdin,
            path: path.to_path_buf(),
            width,
            height,
        }))
    }
}

struct FfmpegVideoSink {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    width: u32,
    height: u32,
}

impl FfmpegVideoSink {
    fn write_error(&self, source: std::io::Error) -> RecordingError {
        RecordingError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl VideoSink for FfmpegVideoSink {
    async fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(self.write_error(std::io::Error::other(format!(
                "frame is {}x{}, segment is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ))));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.write_error(std::io::ErrorKind::BrokenPipe.into()));
        };
        let written = stdin.write_all(frame.as_raw()).await;
        written.map_err(|e| self.write_error(e))
    }

    async fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        // closing stdin lets ffmpeg write the trailer
        drop(self.stdin.take());
        match tokio::time::timeout(FINISH_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!("Closed {}", self.path.display());
                Ok(())
            }
            Ok(Ok(status)) => Err(RecordingError::Finish {
                path: self.path.clone(),
                status: status.to_string(),
            }),
            Ok(Err(source)) => Err(self.write_error(source)),
            Err(_) => {
                let _ = self.child.start_kill();
                Err(RecordingError::Finish {
                    path: self.path.clone(),
                    status: format!("no exit within {:?}", FINISH_TIMEOUT),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_reads_rgb24_from_stdin() {
        let args = FfmpegSinkFactory::args(Path::new("/tmp/a_raw.mp4"), 960, 540, 15);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 960x540 -r 15 -i -"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/a_raw.mp4"));
    }

    #[tokio::test]
    async fn missing_encoder_is_a_spawn_error() {
        let factory = FfmpegSinkFactory::new("/nonexistent/ffmpeg");
        let result = factory.create(Path::new("/tmp/x.mp4"), 4, 4, 1).await;
        assert!(matches!(result, Err(RecordingError::Spawn { .. })));
    }
}
