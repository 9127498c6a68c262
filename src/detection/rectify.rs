use image::{DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use log::debug;

use crate::models::{Quadrilateral, RectifiedImage};

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Size of the straightened card: longest horizontal edge by longest vertical edge
pub fn rectified_size(corners: &[(f32, f32); 4]) -> (u32, u32) {
    let [tl, tr, br, bl] = *corners;
    let width = distance(tl, tr).max(distance(bl, br)).round();
    let height = distance(tl, bl).max(distance(tr, br)).round();
    (width.max(0.0) as u32, height.max(0.0) as u32)
}

/// Warp the region bounded by `quad` into an axis-aligned grayscale image.
/// Returns None for degenerate quads.
pub fn rectify(frame: &DynamicImage, quad: &Quadrilateral) -> Option<RectifiedImage> {
    let corners = quad.to_pixels(frame.width(), frame.height());
    let (out_w, out_h) = rectified_size(&corners);
    if out_w == 0 || out_h == 0 {
        debug!("Degenerate quad, nothing to rectify");
        return None;
    }

    let dest: [(f32, f32); 4] = [
        (0.0, 0.0),                   // top-left
        (out_w as f32, 0.0),          // top-right
        (out_w as f32, out_h as f32), // bottom-right
        (0.0, out_h as f32),          // bottom-left
    ];

    let projection = match Projection::from_control_points(corners, dest) {
        Some(p) => p,
        None => {
            debug!("Failed to compute projective transform");
            return None;
        }
    };

    let gray = frame.to_luma8();
    let mut output = GrayImage::new(out_w, out_h);
    warp_into(&gray, &projection, Interpolation::Bilinear, Luma([255u8]), &mut output);
    Some(output)
}
