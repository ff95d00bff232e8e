use crate::dispatch::dispatcher::panic_message;
use crate::error::PostProcessError;
use crate::recording::segment::{hls_dir, HLS_PLAYLIST};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
const EVENT_CAPACITY: usize = 64;

/// External media tool used to finalize closed segments.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Rewrites `input` into `output` with the index at the front.
    async fn faststart(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), PostProcessError>;

    /// Writes `dir/playlist.m3u8` plus fixed-length chunks.
    async fn segment_hls(
        &self,
        input: &Path,
        dir: &Path,
        chunk_secs: u32,
        timeout: Duration,
    ) -> Result<(), PostProcessError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    fn faststart_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ]
    }

    fn hls_args(input: &Path, dir: &Path, chunk_secs: u32) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "copy".into(),
            "-hls_time".into(),
            chunk_secs.to_string(),
            "-hls_list_size".into(),
            "0".into(),
            "-hls_segment_filename".into(),
            dir.join("seg_%03d.ts").to_string_lossy().into_owned(),
            "-f".into(),
            "hls".into(),
            dir.join(HLS_PLAYLIST).to_string_lossy().into_owned(),
        ]
    }

    async fn run(
        &self,
        step: &'static str,
        args: Vec<String>,
        path: &Path,
        timeout: Duration,
    ) -> Result<(), PostProcessError> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(timeout, output).await {
            Err(_) => {
                return Err(PostProcessError::Timeout {
                    step,
                    path: path.to_path_buf(),
                    timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(PostProcessError::Tool {
                    step,
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(200).collect::<Vec<_>>().into_iter().rev().collect();
        Err(PostProcessError::Tool {
            step,
            path: path.to_path_buf(),
            detail: format!("{}: {}", output.status, tail.trim()),
        })
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn faststart(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), PostProcessError> {
        self.run("faststart", Self::faststart_args(input, output), input, timeout)
            .await
    }

    async fn segment_hls(
        &self,
        input: &Path,
        dir: &Path,
        chunk_secs: u32,
        timeout: Duration,
    ) -> Result<(), PostProcessError> {
        self.run("hls", Self::hls_args(input, dir, chunk_secs), input, timeout)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct PostProcessConfig {
    pub enable_faststart: bool,
    pub enable_hls: bool,
    pub hls_chunk_secs: u32,
    pub faststart_timeout: Duration,
    pub hls_timeout: Duration,
    pub capacity: usize,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            enable_faststart: true,
            enable_hls: true,
            hls_chunk_secs: 2,
            faststart_timeout: Duration::from_secs(60),
            hls_timeout: Duration::from_secs(120),
            capacity: 32,
        }
    }
}

/// Final state of a closed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessOutcome {
    /// Index moved to the front; no HLS rendition.
    Streamable,
    /// HLS playlist and chunks written next to the file.
    Segmented,
    /// Left as the encoder wrote it.
    RawOnly,
    /// The file was gone by the time it was processed.
    Missing,
}

#[derive(Debug, Clone)]
pub struct ProcessedRecording {
    pub path: PathBuf,
    pub outcome: PostProcessOutcome,
    pub playlist: Option<PathBuf>,
}

/// Sending side of the post-processing queue.
#[derive(Debug, Clone)]
pub struct PostProcessQueue {
    tx: mpsc::Sender<PathBuf>,
}

impl PostProcessQueue {
    /// Waits for room in the queue. Returns false once the processor stopped.
    pub async fn enqueue(&self, path: PathBuf) -> bool {
        match self.tx.send(path).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(path)) => {
                warn!("Post-processor stopped, {} stays raw", path.display());
                false
            }
        }
    }
}

/// Background worker finalizing closed segments one at a time.
pub struct PostProcessor {
    queue: PostProcessQueue,
    events: broadcast::Sender<ProcessedRecording>,
    cancel_token: CancellationToken,
    drain_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PostProcessor {
    pub fn start(tool: Arc<dyn MediaTool>, config: PostProcessConfig, cancel_token: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let drain_token = CancellationToken::new();
        let worker = Worker {
            tool,
            config,
            events: events.clone(),
        };
        let handle = tokio::spawn(worker.run(rx, cancel_token.clone(), drain_token.clone()));
        Self {
            queue: PostProcessQueue { tx },
            events,
            cancel_token,
            drain_token,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn queue(&self) -> PostProcessQueue {
        self.queue.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessedRecording> {
        self.events.subscribe()
    }

    /// With `drain` every file already queued is processed first; later
    /// enqueues are refused. Without it the file in progress is abandoned.
    pub async fn stop(&self, drain: bool) {
        let timeout = if drain {
            self.drain_token.cancel();
            DRAIN_TIMEOUT
        } else {
            self.cancel_token.cancel();
            STOP_TIMEOUT
        };
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(timeout, &mut worker).await.is_err() {
                warn!("Post-processor did not stop within {:?}, aborting", timeout);
                worker.abort();
            }
        }
    }
}

impl Drop for PostProcessor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct Worker {
    tool: Arc<dyn MediaTool>,
    config: PostProcessConfig,
    events: broadcast::Sender<ProcessedRecording>,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::Receiver<PathBuf>,
        cancel_token: CancellationToken,
        drain_token: CancellationToken,
    ) {
        let mut draining = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = drain_token.cancelled(), if !draining => {
                    // buffered paths are still delivered after close
                    rx.close();
                    draining = true;
                }
                path = rx.recv() => match path {
                    Some(path) => {
                        let processed = AssertUnwindSafe(self.process(path.clone())).catch_unwind().await;
                        match processed {
                            Ok(processed) => {
                                let _ = self.events.send(processed);
                            }
                            Err(panic) => error!(
                                "Post-processing {} panicked: {}",
                                path.display(),
                                panic_message(&panic)
                            ),
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("Post-processor finished");
    }

    async fn process(&self, path: PathBuf) -> ProcessedRecording {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("Recording {} is missing, skipping post-processing", path.display());
            return ProcessedRecording {
                path,
                outcome: PostProcessOutcome::Missing,
                playlist: None,
            };
        }

        let mut outcome = PostProcessOutcome::RawOnly;
        if self.config.enable_faststart {
            match self.faststart(&path).await {
                Ok(()) => outcome = PostProcessOutcome::Streamable,
                Err(e) => {
                    warn!("{}; keeping raw file", e);
                    return ProcessedRecording {
                        path,
                        outcome,
                        playlist: None,
                    };
                }
            }
        }

        let mut playlist = None;
        if self.config.enable_hls {
            match self.hls(&path).await {
                Ok(written) => {
                    outcome = PostProcessOutcome::Segmented;
                    playlist = Some(written);
                }
                Err(e) => warn!("{}", e),
            }
        }
        info!("Post-processed {} ({:?})", path.display(), outcome);
        ProcessedRecording {
            path,
            outcome,
            playlist,
        }
    }

    async fn faststart(&self, path: &Path) -> Result<(), PostProcessError> {
        let temp = path.with_extension("tmp.mp4");
        let result = self
            .tool
            .faststart(path, &temp, self.config.faststart_timeout)
            .await;
        let exists = tokio::fs::try_exists(&temp).await.unwrap_or(false);
        match result {
            Ok(()) if exists => tokio::fs::rename(&temp, path).await.map_err(|source| {
                PostProcessError::Io {
                    path: temp.clone(),
                    source,
                }
            }),
            other => {
                if exists {
                    let _ = tokio::fs::remove_file(&temp).await;
                }
                other.and(Err(PostProcessError::Tool {
                    step: "faststart",
                    path: path.to_path_buf(),
                    detail: "no output written".to_string(),
                }))
            }
        }
    }

    async fn hls(&self, path: &Path) -> Result<PathBuf, PostProcessError> {
        let dir = hls_dir(path);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PostProcessError::Io {
                path: dir.clone(),
                source,
            })?;
        self.tool
            .segment_hls(path, &dir, self.config.hls_chunk_secs, self.config.hls_timeout)
            .await?;
        let playlist = dir.join(HLS_PLAYLIST);
        if tokio::fs::try_exists(&playlist).await.unwrap_or(false) {
            Ok(playlist)
        } else {
            Err(PostProcessError::Tool {
                step: "hls",
                path: path.to_path_buf(),
                detail: "no playlist written".to_string(),
            })
        }
    }
}
