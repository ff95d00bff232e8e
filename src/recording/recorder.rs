use crate::common::Frame;
use crate::error::RecordingError;
use crate::recording::post_process::PostProcessQueue;
use crate::recording::segment::{day_dir, segment_file_name, RecordingSegment, StreamKind};
use crate::recording::video_sink::VideoSinkFactory;
use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub output_root: PathBuf,
    pub stream_id: String,
    pub save_raw: bool,
    pub save_annotated: bool,
    pub fps: u32,
    pub segment_duration: Duration,
    pub target_width: u32,
    pub target_height: u32,
    /// Wait before reopening a stream whose writer failed.
    pub retry_backoff: Duration,
}

impl RecorderConfig {
    pub fn kinds(&self) -> Vec<StreamKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.save_raw {
            kinds.push(StreamKind::Raw);
        }
        if self.save_annotated {
            kinds.push(StreamKind::Annotated);
        }
        kinds
    }
}

/// Owns the open segment of every enabled stream.
pub struct SegmentRecorder {
    config: RecorderConfig,
    factory: Arc<dyn VideoSinkFactory>,
    queue: PostProcessQueue,
    segments: BTreeMap<StreamKind, RecordingSegment>,
    retry_at: BTreeMap<StreamKind, Instant>,
}

impl SegmentRecorder {
    pub fn new(config: RecorderConfig, factory: Arc<dyn VideoSinkFactory>, queue: PostProcessQueue) -> Self {
        Self {
            config,
            factory,
            queue,
            segments: BTreeMap::new(),
            retry_at: BTreeMap::new(),
        }
    }

    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.segments.values().map(|s| s.path.clone()).collect()
    }

    /// Writes one tick. Each stream rotates on its own once its segment has
    /// run for `segment_duration`. The annotated stream only opens and
    /// receives frames when the detector produced one.
    pub async fn write(&mut self, raw: &Frame, annotated: Option<&Frame>) {
        let now = Instant::now();
        for kind in self.config.kinds() {
            let frame = match kind {
                StreamKind::Raw => raw,
                StreamKind::Annotated => match annotated {
                    Some(frame) => frame,
                    None => continue,
                },
            };
            let expired = self
                .segments
                .get(&kind)
                .is_some_and(|segment| now.duration_since(segment.started) >= self.config.segment_duration);
            if expired {
                if let Some(segment) = self.segments.remove(&kind) {
                    close(&self.queue, segment).await;
                }
            }
            if !self.segments.contains_key(&kind) && !self.start_segment(kind, now).await {
                continue;
            }
            let Some(segment) = self.segments.get_mut(&kind) else {
                continue;
            };
            let pixels = fit(frame.image(), self.config.target_width, self.config.target_height);
            match segment.sink.write(&pixels).await {
                Ok(()) => segment.frames_written += 1,
                Err(e) => {
                    warn!("{}; closing {} segment", e, kind);
                    self.retry_at.insert(kind, Instant::now() + self.config.retry_backoff);
                    if let Some(segment) = self.segments.remove(&kind) {
                        close(&self.queue, segment).await;
                    }
                }
            }
        }
    }

    /// Opens a segment for `kind` unless a recent failure is still backing off.
    async fn start_segment(&mut self, kind: StreamKind, now: Instant) -> bool {
        if self.retry_at.get(&kind).is_some_and(|at| now < *at) {
            return false;
        }
        match open(&self.config, self.factory.as_ref(), kind, Local::now()).await {
            Ok(segment) => {
                info!("Recording {} to {}", kind, segment.path.display());
                self.retry_at.remove(&kind);
                self.segments.insert(kind, segment);
                true
            }
            Err(e) => {
                warn!(
                    "Cannot start {} segment: {}; retrying in {:?}",
                    kind, e, self.config.retry_backoff
                );
                self.retry_at.insert(kind, now + self.config.retry_backoff);
                false
            }
        }
    }

    /// Closes every open segment and queues each one for post-processing.
    pub async fn close_all(&mut self) {
        let segments = std::mem::take(&mut self.segments);
        for (_, segment) in segments {
            close(&self.queue, segment).await;
        }
    }
}

async fn open(
    config: &RecorderConfig,
    factory: &dyn VideoSinkFactory,
    kind: StreamKind,
    started_at: DateTime<Local>,
) -> Result<RecordingSegment, RecordingError> {
    let dir = day_dir(&config.output_root, &config.stream_id, started_at);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| RecordingError::Directory {
            path: dir.clone(),
            source,
        })?;
    let path = free_path(&dir, kind, started_at).await;
    let sink = factory
        .create(&path, config.target_width, config.target_height, config.fps)
        .await?;
    Ok(RecordingSegment {
        path,
        kind,
        started_at,
        started: Instant::now(),
        frames_written: 0,
        sink,
    })
}

/// Finishes the file and hands it to post-processing, even when the encoder
/// failed, so every closed segment gets exactly one job.
async fn close(queue: &PostProcessQueue, segment: RecordingSegment) {
    let RecordingSegment {
        path,
        kind,
        frames_written,
        sink,
        ..
    } = segment;
    if let Err(e) = sink.finish().await {
        warn!("Closing {} segment: {}", kind, e);
    }
    debug!("Closed {} ({} frames)", path.display(), frames_written);
    queue.enqueue(path).await;
}

/// Picks a file name that does not exist yet in `dir`.
async fn free_path(dir: &Path, kind: StreamKind, at: DateTime<Local>) -> PathBuf {
    let mut attempt = 0;
    loop {
        let path = dir.join(segment_file_name(kind, at, attempt));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return path;
        }
        attempt += 1;
    }
}

fn fit(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        image.to_rgb8()
    } else {
        image.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    }
}
