use crate::common::Frame;
use crate::error::DetectorError;
use crate::tracking::zone_tracker::TrackedObject;
use async_trait::async_trait;
use image::DynamicImage;

/// Output of the external detector/tracker for one frame.
#[derive(Debug, Clone, Default)]
pub struct Detections {
    pub objects: Vec<TrackedObject>,
    /// Rendered frame with boxes drawn, when the detector produces one.
    pub annotated: Option<DynamicImage>,
}

impl Detections {
    pub fn new(objects: Vec<TrackedObject>) -> Self {
        Self {
            objects,
            annotated: None,
        }
    }

    pub fn with_annotated(mut self, annotated: DynamicImage) -> Self {
        self.annotated = Some(annotated);
        self
    }
}

/// Object detection and tracking, called once per processed frame.
///
/// Implementations keep their own tracker state; track ids are expected to
/// persist across frames but may flicker or be reassigned.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Detections, DetectorError>;
}

/// Reports nothing. Used when the service runs in record-only mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveDetector;

#[async_trait]
impl Detector for PassiveDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Detections, DetectorError> {
        Ok(Detections::default())
    }
}
