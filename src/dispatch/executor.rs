use crate::dispatch::job::{datetime_key, NotifyJob, SideEffectJob, UploadJob, UploadSource};
use crate::error::JobError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one side-effect job. Called serially from the dispatcher worker.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: SideEffectJob) -> Result<(), JobError>;
}

/// Push notification client.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(&self, message: &str, image_url: Option<&str>) -> Result<(), JobError>;
}

/// Object storage client. Returns the public URL of the stored object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, JobError>;
}

pub struct SideEffectExecutor {
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn ObjectStore>,
    snapshot_size: (u32, u32),
    snapshot_prefix: String,
}

impl SideEffectExecutor {
    pub fn new(notifier: Arc<dyn Notifier>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            notifier,
            store,
            snapshot_size: (960, 540),
            snapshot_prefix: "cctv".to_string(),
        }
    }

    pub fn with_snapshot_size(mut self, width: u32, height: u32) -> Self {
        self.snapshot_size = (width, height);
        self
    }

    pub fn with_snapshot_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.snapshot_prefix = prefix.into();
        self
    }

    async fn notify(&self, job: NotifyJob) -> Result<(), JobError> {
        let image_url = match job.snapshot {
            Some(snapshot) => {
                let (width, height) = self.snapshot_size;
                let jpeg = tokio::task::spawn_blocking(move || snapshot.to_jpeg(width, height))
                    .await
                    .map_err(|e| JobError::Panicked(e.to_string()))??;
                let key = datetime_key(&self.snapshot_prefix, job.at, ".jpg");
                match self.store.put(&key, jpeg, "image/jpeg").await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        // the text notification still goes out
                        warn!("Snapshot upload failed: {}", e);
                        None
                    }
                }
            }
            None => None,
        };
        let message = format!("{}\n{}", job.at.format("%Y-%m-%d %H:%M:%S"), job.message);
        self.notifier.push(&message, image_url.as_deref()).await
    }

    async fn upload(&self, job: UploadJob) -> Result<(), JobError> {
        let bytes = match job.source {
            UploadSource::Bytes(bytes) => bytes,
            UploadSource::File(path) => tokio::fs::read(&path).await.map_err(|e| JobError::Upload {
                key: job.key.clone(),
                reason: format!("cannot read {}: {}", path.display(), e),
            })?,
        };
        let url = self.store.put(&job.key, bytes, &job.content_type).await?;
        info!("Uploaded {} to {}", job.key, url);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for SideEffectExecutor {
    async fn handle(&self, job: SideEffectJob) -> Result<(), JobError> {
        match job {
            SideEffectJob::Notify(job) => self.notify(job).await,
            SideEffectJob::Upload(job) => self.upload(job).await,
        }
    }
}

/// Writes notifications to the log instead of a push service.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn push(&self, message: &str, image_url: Option<&str>) -> Result<(), JobError> {
        info!(image = image_url.unwrap_or("-"), "Notification: {}", message.replace('\n', " | "));
        Ok(())
    }
}

/// Stores objects under a local directory and serves them from a base URL.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, JobError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(JobError::Upload {
                key: key.to_string(),
                reason: "key must be a relative path".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, JobError> {
        let path = self.object_path(key)?;
        let upload_err = |e: std::io::Error| JobError::Upload {
            key: key.to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(upload_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(upload_err)?;
        Ok(format!("{}/{}", self.public_base_url.trim_end_matches('/'), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::job::Snapshot;
    use chrono::{Local, TimeZone};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        pushed: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn push(&self, message: &str, image_url: Option<&str>) -> Result<(), JobError> {
            self.pushed
                .lock()
                .unwrap()
                .push((message.to_string(), image_url.map(str::to_string)));
            Ok(())
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl ObjectStore for OfflineStore {
        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, JobError> {
            Err(JobError::Upload {
                key: key.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::from_image(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
            40,
            30,
            Rgb([1, 2, 3]),
        )))
    }

    #[tokio::test]
    async fn notify_uploads_snapshot_then_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = SideEffectExecutor::new(
            notifier.clone(),
            Arc::new(FsObjectStore::new(dir.path(), "https://cdn.example")),
        )
        .with_snapshot_size(20, 15);
        let at = Local.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();

        executor
            .handle(SideEffectJob::Notify(NotifyJob {
                message: "Someone just walked in".to_string(),
                at,
                snapshot: Some(snapshot()),
            }))
            .await
            .unwrap();

        let pushed = notifier.pushed.lock().unwrap().clone();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "2026-02-03 04:05:06\nSomeone just walked in");
        assert_eq!(
            pushed[0].1.as_deref(),
            Some("https://cdn.example/cctv/2026/02/03/2026-02-03_04-05-06.jpg")
        );
        assert!(dir.path().join("cctv/2026/02/03/2026-02-03_04-05-06.jpg").exists());
    }

    #[tokio::test]
    async fn failed_upload_still_pushes_text() {
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = SideEffectExecutor::new(notifier.clone(), Arc::new(OfflineStore));
        executor
            .handle(SideEffectJob::Notify(NotifyJob {
                message: "after hours".to_string(),
                at: Local::now(),
                snapshot: Some(snapshot()),
            }))
            .await
            .unwrap();
        let pushed = notifier.pushed.lock().unwrap().clone();
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].1.is_none());
    }

    #[tokio::test]
    async fn upload_copies_file_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"mp4").unwrap();
        let store_root = dir.path().join("objects");
        let executor = SideEffectExecutor::new(
            Arc::new(LogNotifier),
            Arc::new(FsObjectStore::new(&store_root, "file://objects")),
        );
        executor
            .handle(SideEffectJob::Upload(UploadJob {
                key: "recordings/cam1/clip.mp4".to_string(),
                content_type: "video/mp4".to_string(),
                source: UploadSource::File(source),
            }))
            .await
            .unwrap();
        assert_eq!(std::fs::read(store_root.join("recordings/cam1/clip.mp4")).unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "file://x");
        assert!(store.put("../evil", vec![1], "text/plain").await.is_err());
        assert!(store.put("/etc/evil", vec![1], "text/plain").await.is_err());
    }
}
