mod common;

use common::{eventually, CollectingNotifier, LoopConnector, MemoryObjectStore, ScriptedDetector};
use footfall::common::Polygon;
use footfall::tracking::TrackedObject;
use footfall::{Coordinator, Settings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// door: x in [0, 99], inside: x in [100, 200]
fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.camera.url = "loop://test".to_string();
    settings.camera.drop_grab_count = 0;
    settings.zones.door = Polygon::from(vec![[0.0, 0.0], [99.0, 0.0], [99.0, 100.0], [0.0, 100.0]]);
    settings.zones.inside = Polygon::from(vec![[100.0, 0.0], [200.0, 0.0], [200.0, 100.0], [100.0, 100.0]]);
    settings.counting.frame_wait_secs = 0.05;
    settings.dispatch.drain_on_stop = true;
    settings.recording.enabled = false;
    settings.visit_log = dir.join("visits.jsonl");
    settings
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_crossing_counts_and_notifies_once() {
    let dir = tempfile::tempdir().unwrap();
    // track 1 crosses, then the tracker reassigns the same person to track 2
    // and reports the crossing again within cooldown and radius
    let detector = ScriptedDetector::new(vec![
        vec![TrackedObject::new(1, 50.0, 50.0)],
        vec![TrackedObject::new(1, 150.0, 50.0)],
        vec![TrackedObject::new(2, 50.0, 50.0)],
        vec![TrackedObject::new(2, 150.0, 50.0)],
        vec![TrackedObject::new(2, 160.0, 50.0)],
    ]);
    let notifier = Arc::new(CollectingNotifier::default());
    let objects = Arc::new(MemoryObjectStore::default());

    let coordinator = Coordinator::builder(settings(dir.path()))
        .connector(Arc::new(LoopConnector {
            interval: Duration::from_millis(5),
        }))
        .detector(detector.clone())
        .notifier(notifier.clone())
        .object_store(objects.clone())
        .start()
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || detector.calls() >= 8).await);
    coordinator.stop().await;

    let state = coordinator.store().snapshot();
    assert_eq!(state.inside_count, 1);
    assert_eq!(state.today_visits, 1);
    assert_eq!(state.entry_log.len(), 1);

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].0.ends_with("Someone just walked in"));
    let image_url = messages[0].1.as_deref().unwrap();
    assert!(image_url.starts_with("mem://cctv/"));
    assert_eq!(objects.keys().len(), 1);

    let visit_log = dir.path().join("visits.jsonl");
    assert!(
        eventually(Duration::from_secs(2), || {
            std::fs::read_to_string(&visit_log)
                .map(|s| s.lines().count() == 1)
                .unwrap_or(false)
        })
        .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabled_alerts_still_count_visits() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = vec![vec![]; 10];
    script.extend([
        vec![TrackedObject::new(7, 20.0, 20.0)],
        vec![TrackedObject::new(7, 120.0, 20.0)],
    ]);
    let detector = ScriptedDetector::new(script);
    let notifier = Arc::new(CollectingNotifier::default());
    let coordinator = Coordinator::builder(settings(dir.path()))
        .connector(Arc::new(LoopConnector {
            interval: Duration::from_millis(5),
        }))
        .detector(detector.clone())
        .notifier(notifier.clone())
        .object_store(Arc::new(MemoryObjectStore::default()))
        .start()
        .await
        .unwrap();
    coordinator.store().set_system_alerts(false);

    assert!(eventually(Duration::from_secs(5), || detector.calls() >= 14).await);
    coordinator.stop().await;

    assert_eq!(coordinator.store().snapshot().today_visits, 1);
    assert!(notifier.messages().is_empty());
}
