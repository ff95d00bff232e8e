use crate::common::Frame;
use crate::config::{secs, Settings};
use crate::dispatch::{
    FsObjectStore, JobHandler, LogNotifier, Notifier, ObjectStore, SideEffectDispatcher, SideEffectExecutor,
    SideEffectJob, UploadJob, UploadSource,
};
use crate::error::AppError;
use crate::intake::{FfmpegStreamConnector, FrameSource, FrameSourceConfig, StreamConnector};
use crate::occupancy::{JsonlVisitLog, OccupancyStore};
use crate::pipeline::{DetectionStage, FrameProcessor, ProcessorConfig};
use crate::recording::{
    FfmpegSinkFactory, FfmpegTool, MediaTool, PostProcessConfig, PostProcessOutcome, PostProcessor,
    ProcessedRecording, RecorderConfig, RecordingWriter, SegmentRecorder, VideoSinkFactory,
};
use crate::tracking::{Detector, PassiveDetector, ZoneMap, ZoneTracker, ZoneTrackerConfig};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const RECORDINGS_PREFIX: &str = "recordings";

/// Owns every background worker of one camera and shuts them down in order.
pub struct Coordinator {
    cancel_token: CancellationToken,
    store: Arc<OccupancyStore>,
    source: Arc<FrameSource>,
    dispatcher: Arc<SideEffectDispatcher>,
    writer: Option<Arc<RecordingWriter>>,
    post_processor: Option<Arc<PostProcessor>>,
    main_loop: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    uploader: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    drain_on_stop: bool,
}

impl Coordinator {
    pub fn builder(settings: Settings) -> CoordinatorBuilder {
        CoordinatorBuilder::new(settings)
    }

    pub fn store(&self) -> Arc<OccupancyStore> {
        Arc::clone(&self.store)
    }

    pub fn source(&self) -> Arc<FrameSource> {
        Arc::clone(&self.source)
    }

    pub fn dispatcher(&self) -> Arc<SideEffectDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Stops the main loop first so nothing new is produced, then lets the
    /// recording side finish its files before the dispatcher and the source
    /// go down. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some((token, handle)) = take(&self.main_loop) {
            token.cancel();
            join("main loop", handle).await;
        }
        if let Some(writer) = &self.writer {
            writer.stop().await;
        }
        if let Some(post_processor) = &self.post_processor {
            post_processor.stop(true).await;
        }
        if let Some((token, handle)) = take(&self.uploader) {
            token.cancel();
            join("recording uploader", handle).await;
        }
        self.dispatcher.stop(self.drain_on_stop).await;
        self.source.stop().await;
        if !self.cancel_token.is_cancelled() {
            self.cancel_token.cancel();
            info!("Coordinator stopped");
        }
    }

    async fn run_main_loop(
        mut processor: FrameProcessor,
        mut frames: watch::Receiver<Option<Frame>>,
        store: Arc<OccupancyStore>,
        frame_wait: Duration,
        status_interval: Duration,
        cancel_token: CancellationToken,
    ) {
        let mut last_frame = None;
        let mut last_status = Instant::now();
        loop {
            let changed = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                changed = tokio::time::timeout(frame_wait, frames.changed()) => changed,
            };
            match changed {
                // no new frame yet, go round to re-check the stop signal
                Err(_) => {}
                Ok(Err(_)) => {
                    warn!("Frame source closed, main loop exiting");
                    break;
                }
                Ok(Ok(())) => {
                    let frame = frames.borrow_and_update().clone();
                    if let Some(frame) = frame.filter(|f| last_frame != Some(f.frame_id())) {
                        last_frame = Some(frame.frame_id());
                        processor.process(frame).await;
                    }
                }
            }
            if last_status.elapsed() >= status_interval {
                let state = store.snapshot();
                let (processed, skipped) = processor.counts();
                info!(
                    inside = state.inside_count,
                    today = state.today_visits,
                    tracks = processor.tracker().tracked_count(),
                    processed,
                    skipped,
                    "Occupancy status"
                );
                last_status = Instant::now();
            }
        }
        debug!("Main loop stopped");
    }

    async fn run_uploader(
        mut events: broadcast::Receiver<ProcessedRecording>,
        output_root: PathBuf,
        dispatcher: Arc<SideEffectDispatcher>,
        cancel_token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = cancel_token.cancelled() => {
                    // pick up outcomes published by the final drain
                    while let Ok(processed) = events.try_recv() {
                        submit_upload(&dispatcher, &output_root, processed);
                    }
                    break;
                }
            };
            match event {
                Ok(processed) => submit_upload(&dispatcher, &output_root, processed),
                Err(RecvError::Lagged(missed)) => warn!("Recording uploader missed {} segments", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn submit_upload(dispatcher: &SideEffectDispatcher, output_root: &Path, processed: ProcessedRecording) {
    if !matches!(
        processed.outcome,
        PostProcessOutcome::Streamable | PostProcessOutcome::Segmented
    ) {
        return;
    }
    let key = recording_key(output_root, &processed.path);
    let job = SideEffectJob::Upload(UploadJob {
        key,
        content_type: "video/mp4".to_string(),
        source: UploadSource::File(processed.path),
    });
    if !dispatcher.submit(job) {
        warn!("Dispatcher full, recording upload dropped");
    }
}

/// `recordings/{stream}/{day}/{file}` relative to the output root.
fn recording_key(output_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(output_root).unwrap_or(path);
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    format!("{}/{}", RECORDINGS_PREFIX, parts.join("/"))
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn join(name: &str, mut handle: JoinHandle<()>) {
    if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
        warn!("{} did not stop within {:?}, aborting", name, STOP_TIMEOUT);
        handle.abort();
    }
}

/// Wires the collaborators of a [`Coordinator`]. Anything not overridden is
/// built from the settings with the ffmpeg and local-filesystem defaults.
pub struct CoordinatorBuilder {
    settings: Settings,
    detector: Option<Arc<dyn Detector>>,
    connector: Option<Arc<dyn StreamConnector>>,
    sink_factory: Option<Arc<dyn VideoSinkFactory>>,
    media_tool: Option<Arc<dyn MediaTool>>,
    notifier: Option<Arc<dyn Notifier>>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl CoordinatorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            detector: None,
            connector: None,
            sink_factory: None,
            media_tool: None,
            notifier: None,
            object_store: None,
        }
    }

    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn sink_factory(mut self, sink_factory: Arc<dyn VideoSinkFactory>) -> Self {
        self.sink_factory = Some(sink_factory);
        self
    }

    pub fn media_tool(mut self, media_tool: Arc<dyn MediaTool>) -> Self {
        self.media_tool = Some(media_tool);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn object_store(mut self, object_store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(object_store);
        self
    }

    /// Validates the settings and starts every worker. Nothing is spawned
    /// when validation or the visit log fails.
    pub async fn start(self) -> Result<Coordinator, AppError> {
        let settings = self.settings;
        settings.validate()?;

        let visit_log = JsonlVisitLog::open(&settings.visit_log).await?;
        info!("Visit log at {}", visit_log.path().display());
        let store = Arc::new(OccupancyStore::new().with_sink(Arc::new(visit_log)));

        let cancel_token = CancellationToken::new();
        let notifications = &settings.notifications;
        let handler: Arc<dyn JobHandler> = Arc::new(
            SideEffectExecutor::new(
                self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                self.object_store.unwrap_or_else(|| {
                    Arc::new(FsObjectStore::new(
                        notifications.storage_root.clone(),
                        notifications.public_base_url.clone(),
                    ))
                }),
            )
            .with_snapshot_size(notifications.snapshot_width, notifications.snapshot_height),
        );
        let dispatcher = Arc::new(SideEffectDispatcher::start_with_token(
            handler,
            settings.dispatch.queue_capacity,
            cancel_token.child_token(),
        ));

        let camera = &settings.camera;
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(FfmpegStreamConnector::new(
                camera.ffmpeg.clone(),
                camera.url.clone(),
                camera.width,
                camera.height,
                secs(camera.read_timeout_secs),
            ))
        });
        let source = Arc::new(FrameSource::start(
            connector,
            FrameSourceConfig {
                stream_id: camera.stream_id.clone(),
                drop_grab_count: camera.drop_grab_count,
                reconnect_backoff: secs(camera.reconnect_secs),
            },
            cancel_token.child_token(),
        ));

        let recording = &settings.recording;
        let (writer, post_processor) = if recording.enabled {
            let post_processor = Arc::new(PostProcessor::start(
                self.media_tool
                    .unwrap_or_else(|| Arc::new(FfmpegTool::new(camera.ffmpeg.clone()))),
                PostProcessConfig {
                    enable_faststart: recording.enable_faststart,
                    enable_hls: recording.enable_hls,
                    hls_chunk_secs: recording.hls_chunk_secs,
                    faststart_timeout: secs(recording.faststart_timeout_secs),
                    hls_timeout: secs(recording.hls_timeout_secs),
                    capacity: recording.post_process_capacity,
                },
                cancel_token.child_token(),
            ));
            let recorder = SegmentRecorder::new(
                RecorderConfig {
                    output_root: recording.output_root.clone(),
                    stream_id: camera.stream_id.clone(),
                    save_raw: recording.save_raw,
                    save_annotated: recording.save_annotated,
                    fps: recording.fps,
                    segment_duration: secs(recording.segment_secs),
                    target_width: recording.target_width,
                    target_height: recording.target_height,
                    retry_backoff: secs(recording.retry_secs),
                },
                self.sink_factory
                    .unwrap_or_else(|| Arc::new(FfmpegSinkFactory::new(camera.ffmpeg.clone()))),
                post_processor.queue(),
            );
            let writer = Arc::new(RecordingWriter::start(
                recorder,
                recording.fps,
                cancel_token.child_token(),
            ));
            info!("Recording to {}", recording.output_root.display());
            (Some(writer), Some(post_processor))
        } else {
            info!("Recording disabled");
            (None, None)
        };

        let uploader = match &post_processor {
            Some(post_processor) if notifications.upload_recordings => {
                let token = cancel_token.child_token();
                let handle = tokio::spawn(Coordinator::run_uploader(
                    post_processor.subscribe(),
                    recording.output_root.clone(),
                    Arc::clone(&dispatcher),
                    token.clone(),
                ));
                Some((token, handle))
            }
            _ => None,
        };

        let counting = &settings.counting;
        let tracker = ZoneTracker::new(ZoneTrackerConfig {
            zones: ZoneMap::new(settings.zones.door.clone(), settings.zones.inside.clone()),
            entry_cooldown: secs(counting.entry_cooldown_secs),
            entry_radius: counting.entry_radius,
            notify_cooldown: secs(counting.notify_cooldown_secs),
            empty_frame_threshold: counting.empty_frame_threshold,
            trail_length: counting.trail_length,
            cleanup_interval: secs(counting.cleanup_interval_secs),
        });
        let detection = DetectionStage::new(
            self.detector.unwrap_or_else(|| Arc::new(PassiveDetector)),
            counting.detector_timeout_secs.map(secs),
        );
        let mut processor = FrameProcessor::new(
            detection,
            tracker,
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            ProcessorConfig {
                entry_message: notifications.entry_message.clone(),
                after_hours: notifications.after_hours.clone(),
                after_hours_cooldown: secs(notifications.after_hours_cooldown_secs),
            },
        );
        if let Some(writer) = &writer {
            processor = processor.with_recorder(Arc::clone(writer));
        }

        let main_token = cancel_token.child_token();
        let main_loop = tokio::spawn(Coordinator::run_main_loop(
            processor,
            source.subscribe(),
            Arc::clone(&store),
            secs(counting.frame_wait_secs),
            settings.status_interval(),
            main_token.clone(),
        ));

        info!("Footfall pipeline started for {}", camera.stream_id);
        Ok(Coordinator {
            cancel_token,
            store,
            source,
            dispatcher,
            writer,
            post_processor,
            main_loop: Mutex::new(Some((main_token, main_loop))),
            uploader: Mutex::new(uploader),
            drain_on_stop: settings.dispatch.drain_on_stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, ConfigError};
    use crate::intake::FrameStream;
    use async_trait::async_trait;

    struct OfflineConnector;

    #[async_trait]
    impl StreamConnector for OfflineConnector {
        async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
            Err(CaptureError::EndOfStream)
        }

        fn describe(&self) -> String {
            "offline".to_string()
        }
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.camera.url = "rtsp://127.0.0.1/cam1".to_string();
        settings.camera.reconnect_secs = 0.01;
        settings.visit_log = dir.join("visits.jsonl");
        settings.recording.enabled = false;
        settings
    }

    #[test]
    fn recording_keys_are_relative_to_the_output_root() {
        let key = recording_key(
            Path::new("/srv/rec"),
            Path::new("/srv/rec/cam1/20260301/20260301_101500_000_raw.mp4"),
        );
        assert_eq!(key, "recordings/cam1/20260301/20260301_101500_000_raw.mp4");
    }

    #[tokio::test]
    async fn invalid_settings_start_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.camera.url.clear();
        let result = Coordinator::builder(settings).start().await;
        assert!(matches!(result, Err(AppError::Config(ConfigError::Invalid { .. }))));
        assert!(!dir.path().join("visits.jsonl").exists());
    }

    #[tokio::test]
    async fn stop_is_idempotent_while_source_is_offline() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::builder(settings(dir.path()))
            .connector(Arc::new(OfflineConnector))
            .start()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coordinator.is_running());
        assert!(coordinator.source().latest().is_none());

        coordinator.stop().await;
        coordinator.stop().await;
        assert!(!coordinator.is_running());
        assert!(!coordinator.source().is_running());
        assert_eq!(coordinator.store().snapshot().inside_count, 0);
    }
}
