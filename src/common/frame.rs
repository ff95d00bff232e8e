use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Arc;
use uuid::Uuid;

/// A captured video frame.
///
/// The pixel buffer is shared between clones. Consumers that need to draw on
/// a frame go through [`Frame::image_mut`], which copies the buffer first if
/// anyone else still holds it, so the source's latest frame is never touched.
#[derive(Clone, Debug)]
pub struct Frame {
    stream_id: Arc<str>,
    image: Arc<DynamicImage>,
    captured_at: DateTime<Utc>,
    frame_id: Uuid,
}

impl Frame {
    pub fn new(stream_id: impl Into<Arc<str>>, image: DynamicImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            stream_id: stream_id.into(),
            image: Arc::new(image),
            captured_at,
            frame_id: Uuid::new_v4(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut DynamicImage {
        Arc::make_mut(&mut self.image)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Replaces the pixels while keeping identity and timestamp, used for the
    /// annotated rendition the detector hands back.
    pub fn with_image(&self, image: DynamicImage) -> Self {
        Self {
            stream_id: Arc::clone(&self.stream_id),
            image: Arc::new(image),
            captured_at: self.captured_at,
            frame_id: self.frame_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid(r: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(
            16,
            16,
            Rgb([r, 2, 3]),
        ))
    }

    #[test]
    fn cloning_frame_shares_image_buffer() {
        let f1 = Frame::new("cam1", solid(1), Utc::now());
        let f2 = f1.clone();
        assert!(Arc::ptr_eq(&f1.image, &f2.image));
        assert_eq!(f1.frame_id(), f2.frame_id());
    }

    #[test]
    fn writing_to_a_clone_leaves_the_original_untouched() {
        let original = Frame::new("cam1", solid(1), Utc::now());
        let mut copy = original.clone();
        if let DynamicImage::ImageRgb8(buffer) = copy.image_mut() {
            buffer.put_pixel(0, 0, Rgb([200, 200, 200]));
        }
        assert_eq!(original.image().to_rgb8().get_pixel(0, 0), &Rgb([1, 2, 3]));
        assert_eq!(copy.image().to_rgb8().get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert!(!Arc::ptr_eq(&original.image, &copy.image));
    }
}
