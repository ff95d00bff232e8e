use crate::common::Frame;
use crate::dispatch::{NotifyJob, SideEffectDispatcher, SideEffectJob, Snapshot};
use crate::occupancy::OccupancyStore;
use crate::pipeline::after_hours::AfterHoursSchedule;
use crate::pipeline::context::FrameContext;
use crate::pipeline::detector_service::DetectionStage;
use crate::recording::RecordingWriter;
use crate::tracking::{FrameUpdate, ZoneTracker};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub entry_message: String,
    pub after_hours: AfterHoursSchedule,
    pub after_hours_cooldown: Duration,
}

/// What one processed frame produced.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// `None` when detection failed and the frame was skipped.
    pub update: Option<FrameUpdate>,
    pub entry_alert: bool,
    pub after_hours_alert: bool,
}

/// Runs detection, zone tracking and side-effect fan-out for each frame.
/// Owned by the main loop; nothing here blocks on disk or network.
pub struct FrameProcessor {
    detection: DetectionStage,
    tracker: ZoneTracker,
    store: Arc<OccupancyStore>,
    dispatcher: Arc<SideEffectDispatcher>,
    recorder: Option<Arc<RecordingWriter>>,
    config: ProcessorConfig,
    last_after_hours_alert: Option<DateTime<Utc>>,
    processed: u64,
    skipped: u64,
}

impl FrameProcessor {
    pub fn new(
        detection: DetectionStage,
        tracker: ZoneTracker,
        store: Arc<OccupancyStore>,
        dispatcher: Arc<SideEffectDispatcher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            detection,
            tracker,
            store,
            dispatcher,
            recorder: None,
            config,
            last_after_hours_alert: None,
            processed: 0,
            skipped: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<RecordingWriter>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn tracker(&self) -> &ZoneTracker {
        &self.tracker
    }

    /// (processed, skipped)
    pub fn counts(&self) -> (u64, u64) {
        (self.processed, self.skipped)
    }

    pub async fn process(&mut self, frame: Frame) -> FrameReport {
        let frame_id = frame.frame_id();
        let detected = match self.detection.run(FrameContext::new(frame.clone())).await {
            Ok(detected) => detected,
            Err(e) => {
                self.skipped += 1;
                warn!("Skipping frame {}: {}", frame_id, e);
                if let Some(recorder) = &self.recorder {
                    recorder.update(&frame, None);
                }
                return FrameReport::default();
            }
        };
        self.processed += 1;

        let annotated = detected.annotated_frame();
        if let Some(recorder) = &self.recorder {
            recorder.update(detected.frame(), annotated.as_ref());
        }

        let captured_at = detected.frame().captured_at();
        let local = captured_at.with_timezone(&Local);
        let update = self.tracker.update(&detected.detections().objects, captured_at);

        for _ in &update.entries {
            self.store.record_entry_at(local);
        }
        for _ in &update.exits {
            self.store.exit_one();
        }
        if update.became_empty {
            self.store.clear_inside();
        }

        let alerts_enabled = self.store.system_alerts_enabled();
        let snapshot_source = annotated.as_ref().unwrap_or(detected.frame());

        let mut report = FrameReport::default();
        if update.notify && alerts_enabled {
            info!("Entry after empty room, notifying");
            report.entry_alert = self.submit_alert(self.config.entry_message.clone(), local, snapshot_source);
        }

        let in_zones = update.detected_in_zones();
        if alerts_enabled
            && in_zones > 0
            && self.config.after_hours.is_after_hours(&local)
            && self.after_hours_cooldown_elapsed(captured_at)
        {
            self.last_after_hours_alert = Some(captured_at);
            info!("After-hours alert: {} person(s) detected", in_zones);
            report.after_hours_alert = self.submit_alert(
                format!("After hours: {} person(s) detected", in_zones),
                local,
                snapshot_source,
            );
        }

        debug!(
            "Frame {} {} in {:?}: {} objects, {} inside, {} entries, {} exits",
            frame_id,
            detected.stage(),
            detected.metrics().detection_duration().unwrap_or_default(),
            update.observations.len(),
            update.inside_now,
            update.entries.len(),
            update.exits.len()
        );

        report.update = Some(update);
        report
    }

    fn submit_alert(&self, message: String, at: DateTime<Local>, frame: &Frame) -> bool {
        let accepted = self.dispatcher.submit(SideEffectJob::Notify(NotifyJob {
            message,
            at,
            snapshot: Some(Snapshot::from_image(frame.image())),
        }));
        if !accepted {
            warn!("Side effect queue full, alert dropped");
        }
        accepted
    }

    fn after_hours_cooldown_elapsed(&self, at: DateTime<Utc>) -> bool {
        match self.last_after_hours_alert {
            None => true,
            Some(last) => (at - last)
                .to_std()
                .map(|elapsed| elapsed > self.config.after_hours_cooldown)
                .unwrap_or(false),
        }
    }
}
