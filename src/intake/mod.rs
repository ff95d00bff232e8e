pub mod ffmpeg_reader;
pub mod frame_source;
pub mod reader;

pub use ffmpeg_reader::FfmpegStreamConnector;
pub use frame_source::{FrameSource, FrameSourceConfig};
pub use reader::{FrameStream, StreamConnector};
