use crate::error::CaptureError;
use crate::intake::reader::{FrameStream, StreamConnector};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

const DEVICE_SCHEME: &str = "device://";
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Decodes a stream with an ffmpeg child process emitting raw `rgb24` frames
/// of a fixed size on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegStreamConnector {
    ffmpeg: PathBuf,
    url: String,
    width: u32,
    height: u32,
    read_timeout: Duration,
}

impl FfmpegStreamConnector {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        url: impl Into<String>,
        width: u32,
        height: u32,
        read_timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            url: url.into(),
            width,
            height,
            read_timeout,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into(), "-nostdin".into()];
        if let Some(index) = self.url.strip_prefix(DEVICE_SCHEME) {
            args.extend(["-f".into(), "v4l2".into(), "-i".into(), format!("/dev/video{}", index)]);
        } else if self.url.starts_with("rtsp://") || self.url.starts_with("rtsps://") {
            args.extend(["-rtsp_transport".into(), "tcp".into(), "-i".into(), self.url.clone()]);
        } else {
            args.extend(["-i".into(), self.url.clone()]);
        }
        args.extend([
            "-an".into(),
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-f".into(),
            "rawvideo".into(),
            "-".into(),
        ]);
        args
    }
}

#[async_trait]
impl StreamConnector for FfmpegStreamConnector {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Open {
                url: self.url.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| CaptureError::Open {
            url: self.url.clone(),
            source: std::io::Error::other("ffmpeg stdout not captured"),
        })?;
        debug!("Spawned ffmpeg for {} (pid {:?})", self.url, child.id());
        let frame_len = self.width as usize * self.height as usize * 3;
        Ok(Box::new(FfmpegFrameStream {
            child,
            stdout: BufReader::with_capacity(frame_len, stdout),
            buffer: vec![0u8; frame_len],
            width: self.width,
            height: self.height,
            read_timeout: self.read_timeout,
        }))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct FfmpegFrameStream {
    child: Child,
    stdout: BufReader<ChildStdout>,
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    read_timeout: Duration,
}

impl FfmpegFrameStream {
    async fn fill(&mut self) -> Result<(), CaptureError> {
        match tokio::time::timeout(self.read_timeout, self.stdout.read_exact(&mut self.buffer)).await {
            Err(_) => Err(CaptureError::Timeout(self.read_timeout)),
            Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => Err(CaptureError::EndOfStream),
            Ok(Err(e)) => Err(CaptureError::Read(e)),
            Ok(Ok(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl FrameStream for FfmpegFrameStream {
    async fn grab(&mut self) -> Result<(), CaptureError> {
        self.fill().await
    }

    async fn read(&mut self) -> Result<DynamicImage, CaptureError> {
        self.fill().await?;
        RgbImage::from_raw(self.width, self.height, self.buffer.clone())
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| CaptureError::Decode(format!("expected {}x{} rgb24", self.width, self.height)))
    }

    async fn release(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("ffmpeg already gone: {}", e);
        }
        if tokio::time::timeout(RELEASE_TIMEOUT, self.child.wait()).await.is_err() {
            debug!("ffmpeg did not exit within {:?}", RELEASE_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(url: &str) -> FfmpegStreamConnector {
        FfmpegStreamConnector::new("ffmpeg", url, 640, 360, Duration::from_secs(5))
    }

    #[test]
    fn rtsp_uses_tcp_transport() {
        let args = connector("rtsp://10.0.0.2:554/stream1").args();
        let i = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        assert_eq!(args[i + 1], "tcp");
        assert!(args.contains(&"rtsp://10.0.0.2:554/stream1".to_string()));
        assert!(args.contains(&"scale=640:360".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn device_url_maps_to_v4l2() {
        let args = connector("device://2").args();
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "v4l2"));
        assert!(args.contains(&"/dev/video2".to_string()));
        assert!(!args.contains(&"-rtsp_transport".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_an_open_error() {
        let connector = FfmpegStreamConnector::new(
            "/nonexistent/ffmpeg",
            "rtsp://127.0.0.1/x",
            16,
            16,
            Duration::from_millis(100),
        );
        assert!(matches!(connector.open().await, Err(CaptureError::Open { .. })));
    }
}
