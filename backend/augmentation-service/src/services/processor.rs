//! Image processor - normalizes uploads and renders rotation variants
//!
//! Normalization fits the source into the target box (Lanczos3, never upscaling)
//! and centers it on a fixed-size canvas, so every downstream variant shares the
//! same dimensions regardless of the source aspect ratio.
//!
//! Uses `spawn_blocking` for CPU-intensive operations to avoid blocking the async runtime.

use crate::error::{AppError, Result};
use crate::models::RotationAngle;
use crate::services::keys;
use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Configuration for image processing
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub target_width: u32,
    pub target_height: u32,
    /// Canvas color and fill for transparent or exposed pixels
    pub background: Rgb<u8>,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            target_width: 256,
            target_height: 256,
            background: Rgb([255, 255, 255]),
            jpeg_quality: 90,
        }
    }
}

/// Encoding chosen for a derived artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Bmp,
    Tiff,
}

impl OutputFormat {
    /// Format from the key's extension, JPEG when unrecognized
    pub fn for_key(key: &str) -> Self {
        match keys::extension(key).map(str::to_ascii_lowercase).as_deref() {
            Some("png") => OutputFormat::Png,
            Some("bmp") => OutputFormat::Bmp,
            Some("tif") | Some("tiff") => OutputFormat::Tiff,
            _ => OutputFormat::Jpeg,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Bmp => "image/bmp",
            OutputFormat::Tiff => "image/tiff",
        }
    }
}

/// Encoded output of a processing step
#[derive(Debug)]
pub struct ProcessedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

/// Image processor
pub struct ImageProcessor {
    config: ProcessorConfig,
}

impl ImageProcessor {
    /// Create a new processor with the given configuration
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    /// Create a processor with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ProcessorConfig::default())
    }

    /// Produce the fixed-size JPEG canvas for a source image (blocking version)
    pub fn normalize(&self, original_data: &[u8]) -> Result<ProcessedImage> {
        let img = image::load_from_memory(original_data)?;

        let (orig_w, orig_h) = img.dimensions();
        debug!(
            original_width = orig_w,
            original_height = orig_h,
            color = ?img.color(),
            "Normalizing image"
        );

        let rgb = self.flatten(&img);
        let (fit_w, fit_h) = self.fit_dimensions(orig_w, orig_h);
        let resized = if (fit_w, fit_h) == (orig_w, orig_h) {
            rgb
        } else {
            imageops::resize(&rgb, fit_w, fit_h, FilterType::Lanczos3)
        };

        let (canvas_w, canvas_h) = (self.config.target_width, self.config.target_height);
        let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, self.config.background);
        let x = (canvas_w - fit_w) / 2;
        let y = (canvas_h - fit_h) / 2;
        imageops::overlay(&mut canvas, &resized, i64::from(x), i64::from(y));

        let data = self.encode(&DynamicImage::ImageRgb8(canvas), OutputFormat::Jpeg)?;

        debug!(
            fit_width = fit_w,
            fit_height = fit_h,
            size = data.len(),
            "Normalized image encoded"
        );

        Ok(ProcessedImage {
            data,
            width: canvas_w,
            height: canvas_h,
            format: OutputFormat::Jpeg,
        })
    }

    /// Render one rotation variant (blocking version).
    ///
    /// The identity variant re-encodes the decoded source unchanged. Right-angle
    /// rotations swap the canvas dimensions, so no content is ever cropped.
    pub fn transform(
        &self,
        source_data: &[u8],
        angle: RotationAngle,
        format: OutputFormat,
    ) -> Result<ProcessedImage> {
        let img = image::load_from_memory(source_data)?;

        let rotated = match angle {
            RotationAngle::Original => img,
            RotationAngle::Deg90 => img.rotate90(),
            RotationAngle::Deg180 => img.rotate180(),
            RotationAngle::Deg270 => img.rotate270(),
        };

        let (width, height) = rotated.dimensions();
        let data = self.encode(&rotated, format)?;

        debug!(angle = %angle, width, height, size = data.len(), "Variant rendered");

        Ok(ProcessedImage {
            data,
            width,
            height,
            format,
        })
    }

    /// Normalize on the blocking thread pool
    pub async fn normalize_async(self: Arc<Self>, original_data: Bytes) -> Result<ProcessedImage> {
        tokio::task::spawn_blocking(move || self.normalize(&original_data))
            .await
            .map_err(|e| AppError::Internal(format!("Normalize task panicked: {e}")))?
    }

    /// Transform on the blocking thread pool
    pub async fn transform_async(
        self: Arc<Self>,
        source_data: Bytes,
        angle: RotationAngle,
        format: OutputFormat,
    ) -> Result<ProcessedImage> {
        tokio::task::spawn_blocking(move || self.transform(&source_data, angle, format))
            .await
            .map_err(|e| AppError::Internal(format!("Transform task panicked: {e}")))?
    }

    /// Largest size that fits the target box while keeping the aspect ratio.
    /// Images already inside the box keep their size.
    fn fit_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let max_w = self.config.target_width;
        let max_h = self.config.target_height;

        if width <= max_w && height <= max_h {
            return (width, height);
        }

        let ratio = f64::min(
            f64::from(max_w) / f64::from(width),
            f64::from(max_h) / f64::from(height),
        );
        let new_w = ((f64::from(width) * ratio).round() as u32).clamp(1, max_w);
        let new_h = ((f64::from(height) * ratio).round() as u32).clamp(1, max_h);
        (new_w, new_h)
    }

    /// Convert to 3-channel RGB, compositing any alpha over the background
    fn flatten(&self, img: &DynamicImage) -> RgbImage {
        if !img.color().has_alpha() {
            return img.to_rgb8();
        }

        let bg = self.config.background;
        let rgba = img.to_rgba8();
        let mut out = RgbImage::from_pixel(rgba.width(), rgba.height(), bg);
        for (x, y, px) in rgba.enumerate_pixels() {
            let alpha = u32::from(px[3]);
            let blend = |c: u8, b: u8| {
                ((u32::from(c) * alpha + u32::from(b) * (255 - alpha) + 127) / 255) as u8
            };
            out.put_pixel(
                x,
                y,
                Rgb([
                    blend(px[0], bg[0]),
                    blend(px[1], bg[1]),
                    blend(px[2], bg[2]),
                ]),
            );
        }
        out
    }

    fn encode(&self, img: &DynamicImage, format: OutputFormat) -> Result<Bytes> {
        let (prepared, output_format) = match format {
            // JPEG has no alpha channel; flatten onto the background first
            OutputFormat::Jpeg => (
                DynamicImage::ImageRgb8(self.flatten(img)),
                ImageOutputFormat::Jpeg(self.config.jpeg_quality),
            ),
            OutputFormat::Png => (normalize_depth(img), ImageOutputFormat::Png),
            OutputFormat::Bmp => (normalize_depth(img), ImageOutputFormat::Bmp),
            OutputFormat::Tiff => (normalize_depth(img), ImageOutputFormat::Tiff),
        };

        let mut buf = Vec::new();
        prepared.write_to(&mut Cursor::new(&mut buf), output_format)?;
        Ok(Bytes::from(buf))
    }
}

/// 8-bit RGB or RGBA, which every supported encoder accepts
fn normalize_depth(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn encode_png(img: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_fit_dimensions_landscape() {
        let processor = ImageProcessor::with_defaults();
        assert_eq!(processor.fit_dimensions(4000, 3000), (256, 192));
    }

    #[test]
    fn test_fit_dimensions_portrait() {
        let processor = ImageProcessor::with_defaults();
        assert_eq!(processor.fit_dimensions(600, 1200), (128, 256));
    }

    #[test]
    fn test_fit_dimensions_never_upscales() {
        let processor = ImageProcessor::with_defaults();
        assert_eq!(processor.fit_dimensions(100, 40), (100, 40));
    }

    #[test]
    fn test_fit_dimensions_extreme_aspect() {
        let processor = ImageProcessor::with_defaults();
        assert_eq!(processor.fit_dimensions(10_000, 2), (256, 1));
    }

    #[test]
    fn test_normalize_produces_target_canvas() {
        let processor = ImageProcessor::with_defaults();
        for (w, h) in [(400, 300), (300, 900), (50, 50), (256, 256)] {
            let png = encode_png(DynamicImage::ImageRgb8(gradient(w, h)));
            let out = processor.normalize(&png).unwrap();
            assert_eq!((out.width, out.height), (256, 256));
            assert_eq!(out.format, OutputFormat::Jpeg);
            assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Jpeg);

            let decoded = image::load_from_memory(&out.data).unwrap();
            assert_eq!(decoded.dimensions(), (256, 256));
        }
    }

    #[test]
    fn test_normalize_pads_with_background() {
        let processor = ImageProcessor::with_defaults();
        let black = RgbImage::from_pixel(400, 100, Rgb([0, 0, 0]));
        let out = processor.normalize(&encode_png(DynamicImage::ImageRgb8(black))).unwrap();
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();

        // 400x100 fits as 256x64, centered vertically
        let top = decoded.get_pixel(128, 5);
        let middle = decoded.get_pixel(128, 128);
        assert!(top.0.iter().all(|&c| c > 240), "padding should be white: {top:?}");
        assert!(middle.0.iter().all(|&c| c < 15), "content should be black: {middle:?}");
    }

    #[test]
    fn test_normalize_flattens_alpha_and_greyscale() {
        let processor = ImageProcessor::with_defaults();

        let transparent = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 0]));
        let out = processor
            .normalize(&encode_png(DynamicImage::ImageRgba8(transparent)))
            .unwrap();
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();
        assert!(decoded.get_pixel(128, 128).0.iter().all(|&c| c > 240));

        let grey =
            DynamicImage::ImageLuma8(image::GrayImage::from_pixel(300, 300, image::Luma([80])));
        let out = processor.normalize(&encode_png(grey)).unwrap();
        assert_eq!((out.width, out.height), (256, 256));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let processor = ImageProcessor::with_defaults();
        let err = processor.normalize(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AppError::Image(_)));
    }

    #[test]
    fn test_transform_swaps_dimensions() {
        let processor = ImageProcessor::with_defaults();
        let png = encode_png(DynamicImage::ImageRgb8(gradient(40, 20)));

        let rotated = processor.transform(&png, RotationAngle::Deg90, OutputFormat::Png).unwrap();
        assert_eq!((rotated.width, rotated.height), (20, 40));

        let flipped = processor.transform(&png, RotationAngle::Deg180, OutputFormat::Png).unwrap();
        assert_eq!((flipped.width, flipped.height), (40, 20));
    }

    #[test]
    fn test_transform_is_clockwise() {
        let processor = ImageProcessor::with_defaults();
        let mut img = RgbImage::from_pixel(3, 2, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let png = encode_png(DynamicImage::ImageRgb8(img));

        let out = processor.transform(&png, RotationAngle::Deg90, OutputFormat::Png).unwrap();
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();
        // Top-left moves to top-right under a clockwise quarter turn
        assert_eq!(decoded.dimensions(), (2, 3));
        assert_eq!(decoded.get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_rotation_inverse_restores_pixels() {
        let processor = ImageProcessor::with_defaults();
        let source = gradient(31, 17);
        let png = encode_png(DynamicImage::ImageRgb8(source.clone()));

        for angle in RotationAngle::ALL {
            let forward = processor.transform(&png, angle, OutputFormat::Png).unwrap();
            let back = processor
                .transform(&forward.data, angle.inverse(), OutputFormat::Png)
                .unwrap();
            let restored = image::load_from_memory(&back.data).unwrap().to_rgb8();
            assert_eq!(restored, source, "angle {angle}");
        }
    }

    #[test]
    fn test_output_format_for_key() {
        assert_eq!(OutputFormat::for_key("processed/a.PNG"), OutputFormat::Png);
        assert_eq!(OutputFormat::for_key("a.jpeg"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::for_key("a.tif"), OutputFormat::Tiff);
        assert_eq!(OutputFormat::for_key("a.bmp"), OutputFormat::Bmp);
        assert_eq!(OutputFormat::for_key("a.webp"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::for_key("noext"), OutputFormat::Jpeg);
    }

    #[test]
    fn test_encode_every_format() {
        let processor = ImageProcessor::with_defaults();
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));
        let png = encode_png(rgba);

        for (format, expected) in [
            (OutputFormat::Jpeg, ImageFormat::Jpeg),
            (OutputFormat::Png, ImageFormat::Png),
            (OutputFormat::Bmp, ImageFormat::Bmp),
            (OutputFormat::Tiff, ImageFormat::Tiff),
        ] {
            let out = processor.transform(&png, RotationAngle::Original, format).unwrap();
            assert_eq!(image::guess_format(&out.data).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_async_variants() {
        let processor = Arc::new(ImageProcessor::with_defaults());
        let png = Bytes::from(encode_png(DynamicImage::ImageRgb8(gradient(500, 200))));

        let normalized = processor.clone().normalize_async(png).await.unwrap();
        assert_eq!((normalized.width, normalized.height), (256, 256));

        let rotated = processor
            .transform_async(normalized.data, RotationAngle::Deg270, OutputFormat::Jpeg)
            .await
            .unwrap();
        assert_eq!((rotated.width, rotated.height), (256, 256));
    }
}
