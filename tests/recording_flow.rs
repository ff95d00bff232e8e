mod common;

use common::{eventually, CopyTool, LoopConnector, MemoryObjectStore, RawFileSinkFactory, ScriptedDetector};
use footfall::recording::{hls_dir, StreamKind};
use footfall::{Coordinator, Settings};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn segments_rotate_and_every_closed_file_is_finalized_once() {
    let dir = tempfile::tempdir().unwrap();
    let output_root = dir.path().join("recordings");
    let mut settings = Settings::default();
    settings.camera.url = "loop://test".to_string();
    settings.visit_log = dir.path().join("visits.jsonl");
    settings.recording.output_root = output_root.clone();
    settings.recording.save_annotated = true;
    settings.recording.fps = 50;
    settings.recording.segment_secs = 0.1;
    settings.recording.target_width = 16;
    settings.recording.target_height = 12;
    settings.notifications.upload_recordings = true;
    settings.dispatch.queue_capacity = 64;
    settings.dispatch.drain_on_stop = true;

    let sinks = Arc::new(RawFileSinkFactory::default());
    let objects = Arc::new(MemoryObjectStore::default());
    let detector = ScriptedDetector::new(vec![vec![]]);
    let coordinator = Coordinator::builder(settings)
        .connector(Arc::new(LoopConnector {
            interval: Duration::from_millis(5),
        }))
        .detector(detector.clone())
        .sink_factory(sinks.clone())
        .media_tool(Arc::new(CopyTool))
        .object_store(objects.clone())
        .start()
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || sinks.created(StreamKind::Raw).len() >= 3).await);
    coordinator.stop().await;

    let raw = sinks.created(StreamKind::Raw);
    let annotated = sinks.created(StreamKind::Annotated);
    assert!(raw.len() > 1, "raw segments: {raw:?}");
    assert!(annotated.len() > 1, "annotated segments: {annotated:?}");

    // every segment stops taking frames once 0.1 s at 50 fps has passed
    let frame_bytes = 16 * 12 * 3;
    let max_frames = 50 / 10 + 1;
    let all: Vec<_> = raw.iter().chain(&annotated).collect();
    for path in &all {
        assert!(path.starts_with(output_root.join("cam1")));
        assert!(path.exists(), "{} was removed", path.display());
        let frames = std::fs::metadata(path).unwrap().len() / frame_bytes;
        assert!(frames <= max_frames, "{} holds {frames} frames", path.display());
        assert!(hls_dir(path).join("playlist.m3u8").exists());
    }

    let keys = objects.keys();
    assert_eq!(keys.len(), all.len());
    assert!(keys.iter().all(|k| k.starts_with("recordings/cam1/")));
}
