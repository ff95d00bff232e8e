//! In-process stand-ins for the encoder and media tool.

use crate::error::{PostProcessError, RecordingError};
use crate::recording::post_process::MediaTool;
use crate::recording::video_sink::{VideoSink, VideoSinkFactory};
use async_trait::async_trait;
use image::RgbImage;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Appends raw pixels to the segment file.
#[derive(Default)]
pub(crate) struct FileSinkFactory {
    frames: Arc<Mutex<HashMap<PathBuf, u64>>>,
    fail_after: Option<u64>,
    refuse_suffix: Option<&'static str>,
    attempts: Mutex<Vec<PathBuf>>,
}

impl FileSinkFactory {
    /// Refuses to create any file whose name ends with `suffix`.
    pub(crate) fn refusing(suffix: &'static str) -> Self {
        Self {
            refuse_suffix: Some(suffix),
            ..Default::default()
        }
    }

    /// Every path `create` was called with, including refused ones.
    pub(crate) fn attempts(&self) -> Vec<PathBuf> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn created(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub(crate) fn failing_after(writes: u64) -> Self {
        Self {
            fail_after: Some(writes),
            ..Default::default()
        }
    }

    pub(crate) fn frames(&self, path: &Path) -> u64 {
        self.frames.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl VideoSinkFactory for FileSinkFactory {
    async fn create(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn VideoSink>, RecordingError> {
        self.attempts.lock().unwrap().push(path.to_path_buf());
        if self
            .refuse_suffix
            .is_some_and(|suffix| path.to_string_lossy().ends_with(suffix))
        {
            return Err(RecordingError::Spawn {
                path: path.to_path_buf(),
                source: std::io::ErrorKind::NotFound.into(),
            });
        }
        let file = std::fs::File::create(path).map_err(|source| RecordingError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;
        self.frames.lock().unwrap().insert(path.to_path_buf(), 0);
        Ok(Box::new(FileSink {
            file,
            path: path.to_path_buf(),
            frames: Arc::clone(&self.frames),
            fail_after: self.fail_after,
        }))
    }
}

struct FileSink {
    file: std::fs::File,
    path: PathBuf,
    frames: Arc<Mutex<HashMap<PathBuf, u64>>>,
    fail_after: Option<u64>,
}

#[async_trait]
impl VideoSink for FileSink {
    async fn write(&mut self, frame: &RgbImage) -> Result<(), RecordingError> {
        let mut frames = self.frames.lock().unwrap();
        let count = frames.entry(self.path.clone()).or_default();
        if self.fail_after.is_some_and(|limit| *count >= limit) {
            return Err(RecordingError::Write {
                path: self.path.clone(),
                source: std::io::ErrorKind::BrokenPipe.into(),
            });
        }
        self.file
            .write_all(frame.as_raw())
            .map_err(|source| RecordingError::Write {
                path: self.path.clone(),
                source,
            })?;
        *count += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), RecordingError> {
        Ok(())
    }
}

pub(crate) struct NoopTool;

#[async_trait]
impl MediaTool for NoopTool {
    async fn faststart(&self, _input: &Path, _output: &Path, _timeout: Duration) -> Result<(), PostProcessError> {
        Ok(())
    }

    async fn segment_hls(
        &self,
        _input: &Path,
        _dir: &Path,
        _chunk_secs: u32,
        _timeout: Duration,
    ) -> Result<(), PostProcessError> {
        Ok(())
    }
}
