use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;

/// Blur applied before contour tracing when noise reduction is on
pub const NOISE_REDUCTION_SIGMA: f32 = 0.5;

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Apply Gaussian blur to reduce noise
pub fn apply_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_f32(img, sigma)
}

/// Detect edges using Canny edge detector
pub fn detect_edges(img: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    canny(img, low_threshold, high_threshold)
}

/// Thicken edges so small gaps in a border still close into a loop
pub fn close_gaps(edges: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return edges.clone();
    }
    dilate(edges, Norm::LInf, radius)
}

/// Binarize dark strokes on a light background with Otsu's threshold.
/// Ink becomes 255, paper 0. Returns None when the image has no contrast.
pub fn binarize_ink(img: &GrayImage) -> Option<GrayImage> {
    let level = otsu_level(img);
    let mut ink_pixels = 0u64;
    let mask = GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y)[0] <= level {
            ink_pixels += 1;
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let total = img.width() as u64 * img.height() as u64;
    if ink_pixels == 0 || ink_pixels == total {
        return None;
    }
    Some(mask)
}
