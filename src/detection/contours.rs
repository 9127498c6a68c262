use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_filled_circle_mut;
use imageproc::geometry::arc_length;
use imageproc::point::Point;

use crate::detection::preprocessing;
use crate::models::{ContourImage, RectifiedImage};

/// Shortest outer border considered a stroke, in pixels
pub const MIN_CONTOUR_LENGTH: f64 = 8.0;

/// Outer border of the dominant ink shape together with the holes inside it
#[derive(Debug, Clone)]
pub struct StrokeContour {
    pub outer: Vec<Point<i32>>,
    pub holes: Vec<Vec<Point<i32>>>,
    pub length: f64,
}

impl StrokeContour {
    pub fn points(&self) -> impl Iterator<Item = &Point<i32>> {
        self.outer.iter().chain(self.holes.iter().flatten())
    }

    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        for p in &self.outer {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        (min_x, min_y, max_x, max_y)
    }
}

/// Trace the most prominent ink contour in a binary mask (ink = non-zero).
/// Outer borders touching the image edge belong to the card rim and are skipped.
pub fn find_dominant_contour(mask: &GrayImage) -> Option<StrokeContour> {
    let (width, height) = mask.dimensions();
    let contours = find_contours::<i32>(mask);

    let touches_edge = |points: &[Point<i32>]| {
        points.iter().any(|p| {
            p.x <= 0 || p.y <= 0 || p.x >= width as i32 - 1 || p.y >= height as i32 - 1
        })
    };

    let (index, length) = contours
        .iter()
        .enumerate()
        .filter(|(_, c)| c.border_type == BorderType::Outer && !touches_edge(&c.points))
        .map(|(i, c)| (i, arc_length(&c.points, true)))
        .filter(|(_, len)| *len >= MIN_CONTOUR_LENGTH)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    let holes = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Hole && c.parent == Some(index))
        .map(|c| c.points.clone())
        .collect();

    Some(StrokeContour {
        outer: contours[index].points.clone(),
        holes,
        length,
    })
}

/// Rasterize a contour in white on a black canvas, stroke `stroke_width` pixels wide
pub fn render_contour(contour: &StrokeContour, width: u32, height: u32, stroke_width: u32) -> ContourImage {
    let mut canvas = GrayImage::from_pixel(width, height, Luma([0u8]));
    let radius = (stroke_width / 2).max(1) as i32;
    // Border points are 8-connected, so stamping a disc on each covers the whole path
    for p in contour.points() {
        draw_filled_circle_mut(&mut canvas, (p.x, p.y), radius, Luma([255u8]));
    }
    canvas
}

/// Contour stage: optional noise reduction, dark-on-light tracing, rasterization.
/// Returns None when no contour is found.
pub fn extract_contour_image(rectified: &RectifiedImage, blur_enabled: bool, stroke_width: u32) -> Option<ContourImage> {
    let (width, height) = rectified.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let source = if blur_enabled {
        preprocessing::apply_blur(rectified, preprocessing::NOISE_REDUCTION_SIGMA)
    } else {
        rectified.clone()
    };

    let mask = preprocessing::binarize_ink(&source)?;
    let contour = find_dominant_contour(&mask)?;
    Some(render_contour(&contour, width, height, stroke_width))
}
