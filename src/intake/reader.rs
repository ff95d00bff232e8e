use crate::error::CaptureError;
use async_trait::async_trait;
use image::DynamicImage;

/// Opens a fresh connection to a video stream.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError>;

    /// Human readable target for log lines.
    fn describe(&self) -> String;
}

/// An open stream. Dropping it must release the underlying connection;
/// `release` does the same but waits for it.
#[async_trait]
pub trait FrameStream: Send {
    /// Advances past one buffered frame without decoding it.
    async fn grab(&mut self) -> Result<(), CaptureError>;

    async fn read(&mut self) -> Result<DynamicImage, CaptureError>;

    async fn release(&mut self) {}
}
