use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single raw frame delivered by a capture device
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub sequence: u64,
    pub captured_at: OffsetDateTime,
}

impl Frame {
    pub fn new(image: DynamicImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned grayscale view of the card region
pub type RectifiedImage = GrayImage;

/// White strokes on black, same size as the rectified image
pub type ContourImage = GrayImage;

/// Point in normalized image coordinates (origin top-left, y down, 0..=1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Scale to the pixel extent of an image
    pub fn scaled(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// Four-corner region hypothesized to bound a card in a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub top_left: NormalizedPoint,
    pub top_right: NormalizedPoint,
    pub bottom_left: NormalizedPoint,
    pub bottom_right: NormalizedPoint,
    pub confidence: f32,
}

impl Quadrilateral {
    /// Corners in pixel coordinates, ordered TL, TR, BR, BL (polygon order)
    pub fn to_pixels(&self, width: u32, height: u32) -> [(f32, f32); 4] {
        [
            self.top_left.scaled(width, height),
            self.top_right.scaled(width, height),
            self.bottom_right.scaled(width, height),
            self.bottom_left.scaled(width, height),
        ]
    }

    /// Width of the axis-aligned bounding box, in normalized units
    pub fn bounding_width(&self) -> f32 {
        let xs = [
            self.top_left.x,
            self.top_right.x,
            self.bottom_left.x,
            self.bottom_right.x,
        ];
        let min = xs.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        max - min
    }

    /// Bounding width once projected into a display of `display_width` pixels
    pub fn display_width(&self, display_width: u32) -> f32 {
        self.bounding_width() * display_width as f32
    }
}

/// A digit label in 0..=9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Digit(u8);

impl Digit {
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Digit {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= 9 {
            Ok(Digit(value))
        } else {
            Err(anyhow::anyhow!("Digit out of range: {}", value))
        }
    }
}

impl TryFrom<&str> for Digit {
    type Error = anyhow::Error;

    fn try_from(label: &str) -> Result<Self, Self::Error> {
        let value: u8 = label
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid digit label '{}': {}", label, e))?;
        Digit::try_from(value)
    }
}

impl From<Digit> for u8 {
    fn from(digit: Digit) -> u8 {
        digit.0
    }
}

impl std::fmt::Display for Digit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepted classifier output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub digit: Digit,
    pub confidence: f32,
}

/// Result of running one frame through the pipeline.
/// A miss at any stage leaves every field empty.
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    /// Overlay for the display
    pub quad: Option<Quadrilateral>,
    /// Postprocessed image that was fed to the classifier
    pub thumbnail: Option<GrayImage>,
    pub classification: Option<ClassificationResult>,
}

impl FrameOutcome {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn digit(&self) -> Option<Digit> {
        self.classification.map(|c| c.digit)
    }

    pub fn is_miss(&self) -> bool {
        self.quad.is_none() && self.thumbnail.is_none() && self.classification.is_none()
    }
}
