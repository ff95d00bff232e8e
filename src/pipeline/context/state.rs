use crate::tracking::Detections;

// Markers for how far a frame has travelled through the processor
pub struct IngestedState;
pub struct DetectedState {
    pub(super) detections: Detections,
}

pub trait ProcessingState: 'static {
    fn state_name() -> &'static str;
}

impl ProcessingState for IngestedState {
    fn state_name() -> &'static str {
        "Ingested"
    }
}

impl ProcessingState for DetectedState {
    fn state_name() -> &'static str {
        "Detected"
    }
}
