use crate::Error;
use akaze::image::GrayFloatImage;
use image::GrayImage;
use log::*;
use std::path::Path;

/// An image read from disk in both the 8-bit and the normalized float form.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Kept for drawing the keypoint overlay.
    pub gray: GrayImage,
    /// Intensities divided by 255.
    pub normalized: GrayFloatImage,
}

impl LoadedImage {
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }
}

/// Decode the image at `path` and convert it to a single channel.
pub fn load_image(path: impl AsRef<Path>) -> Result<LoadedImage, Error> {
    let path = path.as_ref();
    let gray = image::open(path)
        .map_err(|source| Error::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    info!(
        "Loaded {} ({}x{})",
        path.display(),
        gray.width(),
        gray.height()
    );
    let normalized = GrayFloatImage::from_luma8(&gray);
    Ok(LoadedImage { gray, normalized })
}
