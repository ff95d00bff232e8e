use crate::dispatch::executor::JobHandler;
use crate::dispatch::job::SideEffectJob;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded queue of side-effect jobs executed serially by one worker task.
///
/// `submit` never waits: a full queue drops the job and reports `false`.
pub struct SideEffectDispatcher {
    sender: Mutex<Option<mpsc::Sender<SideEffectJob>>>,
    capacity: usize,
    cancel_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SideEffectDispatcher {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(handler: Arc<dyn JobHandler>, capacity: usize) -> Self {
        Self::start_with_token(handler, capacity, CancellationToken::new())
    }

    pub fn start_with_token(
        handler: Arc<dyn JobHandler>,
        capacity: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(Self::run_worker(handler, rx, cancel_token.clone()));
        Self {
            sender: Mutex::new(Some(tx)),
            capacity,
            cancel_token,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn submit(&self, job: SideEffectJob) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            debug!("Dispatcher stopped, rejecting {} job", job.name());
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                debug!("Side effect queue full, dropping {} job", job.name());
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!("Side effect worker gone, dropping {} job", job.name());
                false
            }
        }
    }

    /// Jobs queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// With `drain` the worker finishes everything already queued; without it
    /// the worker exits after the job in flight and the rest is discarded.
    /// Safe to call more than once.
    pub async fn stop(&self, drain: bool) {
        // Dropping the only sender closes the queue.
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if !drain {
            if let Some(sender) = &sender {
                let discarded = sender.max_capacity() - sender.capacity();
                if discarded > 0 {
                    info!("Discarding {} queued side effect jobs", discarded);
                }
            }
            self.cancel_token.cancel();
        }
        drop(sender);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, &mut worker).await.is_err() {
                warn!("Side effect worker did not stop within {:?}, aborting", STOP_TIMEOUT);
                worker.abort();
            }
        }
    }

    async fn run_worker(
        handler: Arc<dyn JobHandler>,
        mut rx: mpsc::Receiver<SideEffectJob>,
        cancel_token: CancellationToken,
    ) {
        debug!("Side effect worker started");
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let name = job.name();
            match AssertUnwindSafe(handler.handle(job)).catch_unwind().await {
                Ok(Ok(())) => debug!("Side effect {} job done", name),
                Ok(Err(e)) => error!("Side effect {} job failed: {}", name, e),
                Err(panic) => error!("Side effect {} job panicked: {}", name, panic_message(&panic)),
            }
        }
        debug!("Side effect worker finished");
    }
}

impl Drop for SideEffectDispatcher {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
