use crate::error::JobError;
use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;

/// A side effect queued off the frame-processing path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffectJob {
    Notify(NotifyJob),
    Upload(UploadJob),
}

impl SideEffectJob {
    pub fn name(&self) -> &'static str {
        match self {
            SideEffectJob::Notify(_) => "notify",
            SideEffectJob::Upload(_) => "upload",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyJob {
    pub message: String,
    pub at: DateTime<Local>,
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub key: String,
    pub content_type: String,
    pub source: UploadSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Owned RGB copy of a frame, detached from the capture buffer.
#[derive(Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}

impl Snapshot {
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        Self {
            width: rgb.width(),
            height: rgb.height(),
            rgb: rgb.into_raw(),
        }
    }

    /// Resizes to `width`x`height` and encodes as JPEG.
    pub fn to_jpeg(&self, width: u32, height: u32) -> Result<Vec<u8>, JobError> {
        let buffer = RgbImage::from_raw(self.width, self.height, self.rgb.clone()).ok_or(
            JobError::Snapshot {
                width: self.width,
                height: self.height,
            },
        )?;
        let mut image = DynamicImage::ImageRgb8(buffer);
        if width > 0 && height > 0 && (width, height) != (self.width, self.height) {
            image = image.resize_exact(width, height, FilterType::Triangle);
        }
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
        Ok(bytes)
    }
}

/// Object key of the form `{prefix}/YYYY/MM/DD/YYYY-MM-DD_HH-MM-SS{ext}`.
pub fn datetime_key(prefix: &str, at: DateTime<Local>, ext: &str) -> String {
    let key = format!("{}/{}{}", at.format("%Y/%m/%d"), at.format("%Y-%m-%d_%H-%M-%S"), ext);
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        key
    } else {
        format!("{}/{}", prefix, key)
    }
}
