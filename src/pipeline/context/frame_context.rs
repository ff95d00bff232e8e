use crate::common::Frame;
use crate::pipeline::context::metrics::FrameMetrics;
use crate::pipeline::context::state::{DetectedState, IngestedState, ProcessingState};
use crate::tracking::Detections;
use std::time::{Duration, Instant};

// Frame plus what has been learned about it so far, with the stage tracked
// in the type
pub struct FrameContext<S> {
    frame: Frame,
    metrics: FrameMetrics,
    processing_start: Instant,
    state: S,
}

impl<S: ProcessingState> FrameContext<S> {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn metrics(&self) -> &FrameMetrics {
        &self.metrics
    }

    pub fn elapsed(&self) -> Duration {
        self.processing_start.elapsed()
    }

    pub fn stage(&self) -> &'static str {
        S::state_name()
    }
}

impl FrameContext<IngestedState> {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            metrics: FrameMetrics::new(),
            processing_start: Instant::now(),
            state: IngestedState,
        }
    }

    pub fn into_detected(mut self, detections: Detections) -> FrameContext<DetectedState> {
        self.metrics.record_detection_duration(self.elapsed());
        FrameContext::<DetectedState> {
            frame: self.frame,
            metrics: self.metrics,
            processing_start: self.processing_start,
            state: DetectedState { detections },
        }
    }
}

impl FrameContext<DetectedState> {
    pub fn detections(&self) -> &Detections {
        &self.state.detections
    }

    /// The detector's rendering as a frame sharing identity with the raw one.
    pub fn annotated_frame(&self) -> Option<Frame> {
        self.state
            .detections
            .annotated
            .as_ref()
            .map(|image| self.frame.with_image(image.clone()))
    }
}
