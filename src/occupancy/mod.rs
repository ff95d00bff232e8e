pub mod sink;
pub mod store;

pub use sink::{JsonlVisitLog, VisitRecord, VisitSink};
pub use store::{OccupancyState, OccupancyStore};
