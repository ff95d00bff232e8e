use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),
    #[error("Post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),
    #[error("Side effect error: {0}")]
    Job(#[from] JobError),
    #[error("Visit log error: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// Stream acquisition errors. None of these are fatal: the source reconnects.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open stream {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read frame: {0}")]
    Read(std::io::Error),
    #[error("Stream ended")]
    EndOfStream,
    #[error("Frame could not be decoded: {0}")]
    Decode(String),
    #[error("No frame within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector failed: {0}")]
    Failed(String),
    #[error("Detector timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write visit log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode visit record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Snapshot buffer does not match {width}x{height}")]
    Snapshot { width: u32, height: u32 },
    #[error("Upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },
    #[error("Notification failed: {0}")]
    Notify(String),
    #[error("Job panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to create recording directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to start video writer for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write frame to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Video writer for {path} exited with {status}")]
    Finish { path: PathBuf, status: String },
}

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("{step} failed for {path}: {detail}")]
    Tool {
        step: &'static str,
        path: PathBuf,
        detail: String,
    },
    #[error("{step} timed out after {timeout:?} for {path}")]
    Timeout {
        step: &'static str,
        path: PathBuf,
        timeout: Duration,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
