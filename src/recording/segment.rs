use crate::recording::video_sink::VideoSink;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const CONTAINER_EXTENSION: &str = "mp4";
pub const HLS_PLAYLIST: &str = "playlist.m3u8";

/// Output stream of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Raw,
    Annotated,
}

impl StreamKind {
    pub fn suffix(self) -> &'static str {
        match self {
            StreamKind::Raw => "raw",
            StreamKind::Annotated => "annot",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// `{root}/{stream_id}/{YYYYMMDD}`
pub fn day_dir(root: &Path, stream_id: &str, at: DateTime<Local>) -> PathBuf {
    root.join(stream_id).join(at.format("%Y%m%d").to_string())
}

/// `{YYYYMMDD_HHMMSS_mmm}_{raw|annot}.mp4`, with `_{n}` appended before the
/// suffix when `attempt > 0`.
pub fn segment_file_name(kind: StreamKind, at: DateTime<Local>, attempt: u32) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S_%3f");
    if attempt == 0 {
        format!("{}_{}.{}", stamp, kind.suffix(), CONTAINER_EXTENSION)
    } else {
        format!("{}_{}_{}.{}", stamp, attempt, kind.suffix(), CONTAINER_EXTENSION)
    }
}

/// Directory holding the HLS rendition of a finished segment: the segment
/// path without its extension.
pub fn hls_dir(segment: &Path) -> PathBuf {
    segment.with_extension("")
}

/// One open output file.
pub struct RecordingSegment {
    pub path: PathBuf,
    pub kind: StreamKind,
    pub started_at: DateTime<Local>,
    pub started: Instant,
    pub frames_written: u64,
    pub(crate) sink: Box<dyn VideoSink>,
}

impl fmt::Debug for RecordingSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSegment")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("started_at", &self.started_at)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}
