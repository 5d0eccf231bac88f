use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, Rgb32FImage};

use crate::error::{DetectionError, Result};

use super::locate::FaceRegion;

/// Side length of every image handed to the localizer and the score engine.
pub const INPUT_SIZE: u32 = 224;

// BT.601 luma weights
const LUMA_R: f64 = 0.299;
const LUMA_G: f64 = 0.587;
const LUMA_B: f64 = 0.114;

/// 224x224 RGB image with channels scaled to [0, 1].
#[derive(Debug, Clone)]
pub struct NormalizedImage(Rgb32FImage);

impl NormalizedImage {
    /// Wrap an existing float image, resizing it to the canonical size if needed.
    pub fn from_rgb32f(image: Rgb32FImage) -> Self {
        if image.width() == INPUT_SIZE && image.height() == INPUT_SIZE {
            return Self(image);
        }
        Self::from_dynamic(DynamicImage::ImageRgb32F(image))
    }

    fn from_dynamic(image: DynamicImage) -> Self {
        Self(
            image
                .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
                .to_rgb32f(),
        )
    }

    /// 8-bit grayscale projection, as face detectors expect it.
    pub fn luma(&self) -> GrayImage {
        GrayImage::from_fn(self.0.width(), self.0.height(), |x, y| {
            let [r, g, b] = self.0.get_pixel(x, y).0;
            let value = LUMA_R * f64::from(r) + LUMA_G * f64::from(g) + LUMA_B * f64::from(b);
            Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Crop to `region` (clamped to the image) and scale back up to the canonical size.
    pub fn crop(&self, region: &FaceRegion) -> NormalizedImage {
        let x = region.x.min(INPUT_SIZE - 1);
        let y = region.y.min(INPUT_SIZE - 1);
        let width = region.width.clamp(1, INPUT_SIZE - x);
        let height = region.height.clamp(1, INPUT_SIZE - y);

        let cropped = DynamicImage::ImageRgb32F(self.0.clone()).crop_imm(x, y, width, height);
        Self::from_dynamic(cropped)
    }
}

impl std::ops::Deref for NormalizedImage {
    type Target = Rgb32FImage;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Decode an encoded image (PNG, JPEG, ...) into the canonical input format.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedImage> {
    if bytes.is_empty() {
        return Err(DetectionError::EmptyImage);
    }
    let decoded = image::load_from_memory(bytes)?;
    Ok(NormalizedImage::from_dynamic(decoded))
}
