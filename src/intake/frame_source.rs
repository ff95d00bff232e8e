use crate::common::Frame;
use crate::error::CaptureError;
use crate::intake::reader::{FrameStream, StreamConnector};
use chrono::Utc;
use image::DynamicImage;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct FrameSourceConfig {
    pub stream_id: String,
    /// Frames discarded before each decoded read, to stay close to live.
    pub drop_grab_count: usize,
    pub reconnect_backoff: Duration,
}

/// Reconnecting single-producer frame grabber.
///
/// Only the most recent frame is kept, in a `watch` slot. Readers get a
/// clone whose pixels are copied on first write.
pub struct FrameSource {
    latest_rx: watch::Receiver<Option<Frame>>,
    cancel_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameSource {
    pub fn start(
        connector: Arc<dyn StreamConnector>,
        config: FrameSourceConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        let (latest_tx, latest_rx) = watch::channel(None);
        info!(
            "Starting frame source {} for {}",
            config.stream_id,
            connector.describe()
        );
        let worker = tokio::spawn(Self::run(connector, config, latest_tx, cancel_token.clone()));
        Self {
            latest_rx,
            cancel_token,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The most recent frame, or `None` before the first successful read.
    pub fn latest(&self) -> Option<Frame> {
        self.latest_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.latest_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
            && self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|w| !w.is_finished())
    }

    pub async fn stop(&self) {
        self.cancel_token.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, &mut worker).await.is_err() {
                warn!("Frame source did not stop within {:?}, aborting", STOP_TIMEOUT);
                worker.abort();
            }
        }
    }

    async fn run(
        connector: Arc<dyn StreamConnector>,
        config: FrameSourceConfig,
        latest_tx: watch::Sender<Option<Frame>>,
        cancel_token: CancellationToken,
    ) {
        let stream_id: Arc<str> = Arc::from(config.stream_id.as_str());
        loop {
            let opened = tokio::select! {
                _ = cancel_token.cancelled() => break,
                opened = connector.open() => opened,
            };
            let mut stream = match opened {
                Ok(stream) => {
                    info!("Connected to {}", connector.describe());
                    stream
                }
                Err(e) => {
                    warn!("Cannot open {}: {}", connector.describe(), e);
                    if Self::backoff(&cancel_token, config.reconnect_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let mut frames = 0u64;
            let failure = loop {
                let next = tokio::select! {
                    _ = cancel_token.cancelled() => None,
                    next = Self::next_frame(stream.as_mut(), config.drop_grab_count) => Some(next),
                };
                match next {
                    None => break None,
                    Some(Ok(image)) => {
                        frames += 1;
                        latest_tx.send_replace(Some(Frame::new(Arc::clone(&stream_id), image, Utc::now())));
                    }
                    Some(Err(e)) => break Some(e),
                }
            };
            stream.release().await;
            debug!("Released {} after {} frames", connector.describe(), frames);

            match failure {
                None => break,
                Some(e) => {
                    warn!("Lost {}: {}, reconnecting", connector.describe(), e);
                    if Self::backoff(&cancel_token, config.reconnect_backoff).await {
                        break;
                    }
                }
            }
        }
        info!("Frame source {} stopped", stream_id);
    }

    async fn next_frame(
        stream: &mut dyn FrameStream,
        drop_grab_count: usize,
    ) -> Result<DynamicImage, CaptureError> {
        for _ in 0..drop_grab_count {
            stream.grab().await?;
        }
        stream.read().await
    }

    /// Returns true when cancelled during the wait.
    async fn backoff(cancel_token: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            _ = cancel_token.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
