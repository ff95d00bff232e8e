pub mod dispatcher;
pub mod executor;
pub mod job;

pub use dispatcher::SideEffectDispatcher;
pub use executor::{FsObjectStore, JobHandler, LogNotifier, Notifier, ObjectStore, SideEffectExecutor};
pub use job::{datetime_key, NotifyJob, SideEffectJob, Snapshot, UploadJob, UploadSource};
