use image::GrayImage;
use image::imageops::{self, FilterType};

/// Target height when scaling `width x height` to `output_width`, preserving aspect ratio
pub fn scaled_height(width: u32, height: u32, output_width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let h = (height as f64 * output_width as f64 / width as f64).round() as u32;
    h.max(1)
}

/// Uniform resize so the new width equals `output_width`
pub fn resize_to_width(img: &GrayImage, output_width: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    if output_width == 0 || width == 0 || height == 0 {
        return GrayImage::new(0, 0);
    }
    let new_height = scaled_height(width, height, output_width);
    // Resize with high-quality interpolation
    imageops::resize(img, output_width, new_height, FilterType::CatmullRom)
}

/// Trim `border` pixels from every edge.
///
/// A zero border, or one of at least half the width, leaves the image untouched.
/// Returns None when trimming leaves an empty region.
pub fn crop_border(img: &GrayImage, border: u32) -> Option<GrayImage> {
    let (width, height) = img.dimensions();
    if border == 0 || border >= width / 2 {
        return non_empty(img.clone());
    }

    let new_width = width.saturating_sub(border * 2);
    let new_height = height.saturating_sub(border * 2);
    if new_width == 0 || new_height == 0 {
        return None;
    }

    non_empty(imageops::crop_imm(img, border, border, new_width, new_height).to_image())
}

fn non_empty(img: GrayImage) -> Option<GrayImage> {
    if img.width() == 0 || img.height() == 0 {
        None
    } else {
        Some(img)
    }
}
