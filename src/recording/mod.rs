pub mod post_process;
pub mod recorder;
pub mod segment;
pub mod video_sink;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use post_process::{
    FfmpegTool, MediaTool, PostProcessConfig, PostProcessOutcome, PostProcessQueue, PostProcessor,
    ProcessedRecording,
};
pub use recorder::{RecorderConfig, SegmentRecorder};
pub use segment::{hls_dir, RecordingSegment, StreamKind};
pub use video_sink::{FfmpegSinkFactory, VideoSink, VideoSinkFactory};
pub use writer::RecordingWriter;
