use std::time::Duration;

/// Timings collected while a frame is processed
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMetrics {
    detection_duration: Option<Duration>,
}

impl FrameMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_detection_duration(&mut self, duration: Duration) {
        self.detection_duration = Some(duration);
    }

    pub fn detection_duration(&self) -> Option<Duration> {
        self.detection_duration
    }
}
