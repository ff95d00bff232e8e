use crate::common::Frame;
use crate::recording::recorder::SegmentRecorder;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
struct PendingFrames {
    raw: Frame,
    annotated: Option<Frame>,
}

/// Fixed-rate recording loop.
///
/// `update` only replaces the latest frames; the tick task writes whatever is
/// latest at each tick, so a slow encoder drops frames instead of queueing
/// them.
pub struct RecordingWriter {
    latest: Arc<Mutex<Option<PendingFrames>>>,
    cancel_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingWriter {
    pub fn start(recorder: SegmentRecorder, fps: u32, cancel_token: CancellationToken) -> Self {
        let latest = Arc::new(Mutex::new(None));
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let worker = tokio::spawn(Self::run(
            recorder,
            period,
            Arc::clone(&latest),
            cancel_token.clone(),
        ));
        Self {
            latest,
            cancel_token,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Replaces the frames written on the next tick. The annotated frame is
    /// kept from earlier updates when `None` is passed.
    pub fn update(&self, raw: &Frame, annotated: Option<&Frame>) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let annotated = annotated
            .cloned()
            .or_else(|| latest.as_ref().and_then(|p| p.annotated.clone()));
        *latest = Some(PendingFrames {
            raw: raw.clone(),
            annotated,
        });
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Stops ticking and closes the open segments, which queues them for
    /// post-processing.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, &mut worker).await.is_err() {
                warn!("Recording writer did not stop within {:?}, aborting", STOP_TIMEOUT);
                worker.abort();
            }
        }
    }

    async fn run(
        mut recorder: SegmentRecorder,
        period: Duration,
        latest: Arc<Mutex<Option<PendingFrames>>>,
        cancel_token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let pending = latest.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    if let Some(pending) = pending {
                        recorder.write(&pending.raw, pending.annotated.as_ref()).await;
                    }
                }
            }
        }
        recorder.close_all().await;
        debug!("Recording writer stopped");
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
