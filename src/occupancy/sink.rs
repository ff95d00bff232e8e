use crate::error::SinkError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Durable record of accepted entries. Called fire-and-forget.
#[async_trait]
pub trait VisitSink: Send + Sync {
    async fn record_entry(&self, at: DateTime<Local>) -> Result<u64, SinkError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: u64,
    pub entry_time: DateTime<Local>,
}

struct LogFile {
    file: File,
    next_id: u64,
}

/// Append-only JSON-lines visit log. Ids continue across restarts.
pub struct JsonlVisitLog {
    path: PathBuf,
    inner: Mutex<LogFile>,
}

impl JsonlVisitLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let next_id = match File::open(&path).await {
            Ok(existing) => last_id(existing).await.map_err(io_err)? + 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 1,
            Err(e) => return Err(io_err(e)),
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        Ok(Self {
            path,
            inner: Mutex::new(LogFile { file, next_id }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn last_id(file: File) -> std::io::Result<u64> {
    let mut lines = BufReader::new(file).lines();
    let mut last = 0;
    while let Some(line) = lines.next_line().await? {
        // a torn last line from a crash is skipped
        if let Ok(record) = serde_json::from_str::<VisitRecord>(&line) {
            last = last.max(record.id);
        }
    }
    Ok(last)
}

#[async_trait]
impl VisitSink for JsonlVisitLog {
    async fn record_entry(&self, at: DateTime<Local>) -> Result<u64, SinkError> {
        let mut inner = self.inner.lock().await;
        let record = VisitRecord {
            id: inner.next_id,
            entry_time: at,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let io_err = |source| SinkError::Io {
            path: self.path.clone(),
            source,
        };
        inner.file.write_all(&line).await.map_err(io_err)?;
        inner.file.flush().await.map_err(io_err)?;
        inner.next_id += 1;
        Ok(record.id)
    }
}
