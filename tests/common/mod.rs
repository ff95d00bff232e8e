//! In-process collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use footfall::dispatch::{Notifier, ObjectStore};
use footfall::error::{CaptureError, DetectorError, JobError, PostProcessError, RecordingError};
use footfall::intake::{FrameStream, StreamConnector};
use footfall::recording::{MediaTool, VideoSink, VideoSinkFactory, StreamKind};
use footfall::tracking::{Detections, Detector, TrackedObject};
use footfall::Frame;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Streams solid frames forever, one every `interval`.
pub struct LoopConnector {
    pub interval: Duration,
}

#[async_trait]
impl StreamConnector for LoopConnector {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        Ok(Box::new(LoopStream {
            interval: self.interval,
        }))
    }

    fn describe(&self) -> String {
        "loop://test".to_string()
    }
}

struct LoopStream {
    interval: Duration,
}

#[async_trait]
impl FrameStream for LoopStream {
    async fn grab(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<DynamicImage, CaptureError> {
        tokio::time::sleep(self.interval).await;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([40, 80, 120]))))
    }
}

/// Returns one scripted detection set per call; the last one repeats.
pub struct ScriptedDetector {
    script: Vec<Vec<TrackedObject>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<TrackedObject>>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, frame: &Frame) -> Result<Detections, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let objects = self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_default();
        Ok(Detections::new(objects).with_annotated(frame.image().clone()))
    }
}

#[derive(Default)]
pub struct CollectingNotifier {
    pub messages: Mutex<Vec<(String, Option<String>)>>,
}

impl CollectingNotifier {
    pub fn messages(&self) -> Vec<(String, Option<String>)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn push(&self, message: &str, image_url: Option<&str>) -> Result<(), JobError> {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), image_url.map(str::to_string)));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    pub objects: Mutex<HashMap<String, usize>>,
}

impl MemoryObjectStore {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, JobError> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.len());
        Ok(format!("mem://{key}"))
    }
}

/// Writes raw pixels straight into the segment file.
#[derive(Default)]
pub struct RawFileSinkFactory {
    pub created: Mutex<Vec<PathBuf>>,
}

impl RawFileSinkFactory {
    pub fn created(&self, kind: StreamKind) -> Vec<PathBuf> {
        let suffix = format!("_{kind}.mp4");
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.to_string_lossy().ends_with(&suffix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VideoSinkFactory for RawFileSinkFactory {
    async fn create(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn VideoSink>, RecordingError> {
        let file = std::fs::File::create(path).map_err(|source| RecordingError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;
        self.created.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(RawFileSink {
            file,
            path: path.to_path_buf(),
        }))
    }
}

struct RawFileSink {
    file: std::fs::File,
    path: PathBuf,
}

#[async_trait]
impl VideoSink for RawFileSink {
    async fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError> {
        self.file
            .write_all(frame.as_raw())
            .map_err(|source| RecordingError::Write {
                path: self.path.clone(),
                source,
            })
    }

    async fn finish(self: Box<Self>) -> Result<(), RecordingError> {
        Ok(())
    }
}

/// Copies for faststart and writes a one-line playlist for HLS.
pub struct CopyTool;

#[async_trait]
impl MediaTool for CopyTool {
    async fn faststart(&self, input: &Path, output: &Path, _timeout: Duration) -> Result<(), PostProcessError> {
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|source| PostProcessError::Io {
                path: input.to_path_buf(),
                source,
            })
    }

    async fn segment_hls(
        &self,
        _input: &Path,
        dir: &Path,
        _chunk_secs: u32,
        _timeout: Duration,
    ) -> Result<(), PostProcessError> {
        let io_err = |source| PostProcessError::Io {
            path: dir.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        tokio::fs::write(dir.join("playlist.m3u8"), "#EXTM3U\n")
            .await
            .map_err(io_err)
    }
}

/// Polls `check` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
