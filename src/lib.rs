pub mod common;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod occupancy;
pub mod pipeline;
pub mod recording;
pub mod tracking;

pub use config::Settings;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{AppError, CaptureError, ConfigError, DetectorError, JobError, PostProcessError, RecordingError, SinkError};

pub use common::Frame;
pub use occupancy::{OccupancyState, OccupancyStore};
