//! Still image camera stand-in.

use super::VideoSource;
use crate::error::{PipelineError, PipelineResult};
use image::DynamicImage;
use std::path::PathBuf;
use tracing::info;

/// Serves the same decoded image on every snapshot tick.
pub struct StillImageSource {
    path: PathBuf,
    frame: Option<DynamicImage>,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: None,
        }
    }

    /// Wrap an already decoded frame.
    pub fn from_image(frame: DynamicImage) -> Self {
        Self {
            path: PathBuf::new(),
            frame: Some(frame),
        }
    }
}

impl VideoSource for StillImageSource {
    fn open(&mut self) -> PipelineResult<()> {
        if self.frame.is_some() {
            return Ok(());
        }
        let frame = image::open(&self.path).map_err(|e| {
            PipelineError::MediaAccess(format!("cannot open camera image {}: {}", self.path.display(), e))
        })?;
        info!(
            path = %self.path.display(),
            width = frame.width(),
            height = frame.height(),
            "Opened still image video source"
        );
        self.frame = Some(frame);
        Ok(())
    }

    fn grab_frame(&mut self) -> Option<DynamicImage> {
        self.frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_image_is_media_access_error() {
        let mut source = StillImageSource::new("/nonexistent/camera.png");
        assert!(matches!(source.open(), Err(PipelineError::MediaAccess(_))));
        assert!(source.grab_frame().is_none());
    }

    #[test]
    fn test_wrapped_frame_is_served_every_tick() {
        let mut source = StillImageSource::from_image(DynamicImage::new_rgb8(4, 3));
        source.open().unwrap();
        assert_eq!(source.grab_frame().map(|f| f.width()), Some(4));
        assert_eq!(source.grab_frame().map(|f| f.height()), Some(3));
    }
}
