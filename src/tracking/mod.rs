pub mod deduper;
pub mod detector;
pub mod zone;
pub mod zone_tracker;

pub use deduper::{EntryRecord, SpatialDeduper};
pub use detector::{Detections, Detector, PassiveDetector};
pub use zone::{Transition, Zone, ZoneMap};
pub use zone_tracker::{
    FrameUpdate, Observation, TrackId, TrackedObject, ZoneHistory, ZoneTracker, ZoneTrackerConfig,
};
