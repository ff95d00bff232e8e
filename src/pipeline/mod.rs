pub mod after_hours;
pub mod context;
pub mod detector_service;
pub mod processor;

pub use after_hours::AfterHoursSchedule;
pub use detector_service::{DetectionStage, DetectorService};
pub use processor::{FrameProcessor, FrameReport, ProcessorConfig};
