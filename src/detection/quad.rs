use image::DynamicImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use log::debug;

use crate::detection::preprocessing;
use crate::models::{NormalizedPoint, Quadrilateral};

/// Finds the most card-like quadrilateral in a frame
#[derive(Debug, Clone)]
pub struct QuadDetector {
    pub blur_sigma: f32,
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Dilation radius used to close small gaps in the card border
    pub gap_radius: u8,
    /// Douglas-Peucker tolerance as a fraction of the contour length
    pub approx_epsilon: f64,
    /// Smallest accepted quad area as a fraction of the frame area
    pub min_area_fraction: f32,
    /// Smallest accepted `1 - max|cos(corner angle)|`
    pub min_rectangularity: f32,
    /// Width of the display the overlay is drawn into
    pub display_width: u32,
    /// Quads narrower than this on the display count as not found
    pub min_display_width: f32,
}

impl Default for QuadDetector {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            low_threshold: 20.0,
            high_threshold: 60.0,
            gap_radius: 1,
            approx_epsilon: 0.02,
            min_area_fraction: 0.02,
            min_rectangularity: 0.6,
            display_width: 640,
            min_display_width: 20.0,
        }
    }
}

/// A quadrilateral hypothesis in pixel coordinates, corners in clockwise order from top-left
#[derive(Debug, Clone)]
pub struct QuadCandidate {
    pub corners: [(f32, f32); 4],
    pub area: f32,
    pub rectangularity: f32,
    pub score: f32,
}

impl QuadDetector {
    /// Detect the best quadrilateral, or None if nothing card-like is visible
    pub fn detect(&self, img: &DynamicImage) -> Option<Quadrilateral> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return None;
        }

        let best = self.candidates(img).into_iter().next()?;
        let [tl, tr, br, bl] = best.corners;
        let normalize = |(x, y): (f32, f32)| {
            NormalizedPoint::new(
                (x / width as f32).clamp(0.0, 1.0),
                (y / height as f32).clamp(0.0, 1.0),
            )
        };

        let quad = Quadrilateral {
            top_left: normalize(tl),
            top_right: normalize(tr),
            bottom_left: normalize(bl),
            bottom_right: normalize(br),
            confidence: best.rectangularity,
        };

        let shown = quad.display_width(self.display_width);
        if shown < self.min_display_width {
            debug!("Quad too narrow on display ({:.1}px), ignoring", shown);
            return None;
        }
        Some(quad)
    }

    /// All accepted candidates, best first
    pub fn candidates(&self, img: &DynamicImage) -> Vec<QuadCandidate> {
        let gray = preprocessing::to_grayscale(img);
        let blurred = preprocessing::apply_blur(&gray, self.blur_sigma);
        let edges = preprocessing::detect_edges(&blurred, self.low_threshold, self.high_threshold);
        let edges = preprocessing::close_gaps(&edges, self.gap_radius);

        let frame_area = (img.width() as f32) * (img.height() as f32);
        let mut candidates: Vec<QuadCandidate> = find_contours::<i32>(&edges)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 8)
            .filter_map(|c| {
                let epsilon = (arc_length(&c.points, true) * self.approx_epsilon).max(1.0);
                let polygon = approximate_polygon_dp(&c.points, epsilon, true);
                self.evaluate(&polygon, frame_area)
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        debug!("Quad candidates: {}", candidates.len());
        candidates
    }

    fn evaluate(&self, polygon: &[Point<i32>], frame_area: f32) -> Option<QuadCandidate> {
        let mut vertices: Vec<(f32, f32)> = polygon.iter().map(|p| (p.x as f32, p.y as f32)).collect();
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        let vertices = drop_straight_vertices(vertices);
        if vertices.len() != 4 {
            return None;
        }

        let corners = order_corners(&vertices)?;
        if !is_convex(&corners) {
            return None;
        }

        let area = shoelace_area(&corners);
        let area_fraction = area / frame_area;
        if area_fraction < self.min_area_fraction {
            return None;
        }

        let rectangularity = rectangularity(&corners);
        if rectangularity < self.min_rectangularity {
            return None;
        }

        Some(QuadCandidate {
            corners,
            area,
            rectangularity,
            score: rectangularity * area_fraction.sqrt(),
        })
    }
}

/// Remove vertices where the outline continues almost straight on
fn drop_straight_vertices(mut vertices: Vec<(f32, f32)>) -> Vec<(f32, f32)> {
    loop {
        let n = vertices.len();
        if n <= 4 {
            return vertices;
        }
        let straightest = (0..n)
            .map(|i| (i, corner_cos(vertices[(i + n - 1) % n], vertices[i], vertices[(i + 1) % n])))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        match straightest {
            // cos near -1 means the two edges point in opposite directions from the vertex
            Some((i, cos)) if cos < -0.95 => {
                vertices.remove(i);
            }
            _ => return vertices,
        }
    }
}

/// Cosine of the interior angle at `b`
fn corner_cos(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    let (ux, uy) = (a.0 - b.0, a.1 - b.1);
    let (vx, vy) = (c.0 - b.0, c.1 - b.1);
    let norm = (ux * ux + uy * uy).sqrt() * (vx * vx + vy * vy).sqrt();
    if norm == 0.0 {
        return 1.0;
    }
    (ux * vx + uy * vy) / norm
}

/// Order four vertices clockwise (y down) starting at the top-left one
fn order_corners(vertices: &[(f32, f32)]) -> Option<[(f32, f32); 4]> {
    let cx = vertices.iter().map(|v| v.0).sum::<f32>() / vertices.len() as f32;
    let cy = vertices.iter().map(|v| v.1).sum::<f32>() / vertices.len() as f32;

    let mut sorted = vertices.to_vec();
    sorted.sort_by(|a, b| {
        let ta = (a.1 - cy).atan2(a.0 - cx);
        let tb = (b.1 - cy).atan2(b.0 - cx);
        ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let start = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.0 + a.1).partial_cmp(&(b.0 + b.1)).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)?;

    Some([
        sorted[start],
        sorted[(start + 1) % 4],
        sorted[(start + 2) % 4],
        sorted[(start + 3) % 4],
    ])
}

fn is_convex(corners: &[(f32, f32); 4]) -> bool {
    let signs: Vec<bool> = (0..4)
        .map(|i| {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            let c = corners[(i + 2) % 4];
            (b.0 - a.0) * (c.1 - b.1) - (b.1 - a.1) * (c.0 - b.0) > 0.0
        })
        .collect();
    signs.iter().all(|s| *s) || signs.iter().all(|s| !*s)
}

/// 1.0 for a perfect rectangle, falling towards 0 as corners flatten
fn rectangularity(corners: &[(f32, f32); 4]) -> f32 {
    let max_cos = (0..4)
        .map(|i| corner_cos(corners[(i + 3) % 4], corners[i], corners[(i + 1) % 4]).abs())
        .fold(0.0f32, f32::max);
    1.0 - max_cos
}

/// Area of a polygon given in vertex order (CW or CCW)
pub fn shoelace_area(corners: &[(f32, f32); 4]) -> f32 {
    let n = corners.len();
    let mut area = 0.0f32;
    for i in 0..n {
        let j = (i + 1) % n;
        area += corners[i].0 * corners[j].1;
        area -= corners[j].0 * corners[i].1;
    }
    area.abs() / 2.0
}
