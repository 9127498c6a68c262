use crate::pipeline::{PipelineData, PipelineStep, PipelineContext, MetadataValue};
use crate::detection::{quad::QuadDetector, rectify, contours, postprocess, classifier};
use crate::detection::classifier::DigitClassifier;
use anyhow::Result;
use image::DynamicImage;
use log::{debug, trace};
use std::sync::Arc;

/// Find the card; at most one item survives, carrying the quad
pub struct QuadDetectionStep {
    pub detector: QuadDetector,
}

impl PipelineStep for QuadDetectionStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for mut item in data {
            if let Some(quad) = self.detector.detect(&item.image) {
                trace!("Quad found with confidence {:.2}", quad.confidence);
                item.quad = Some(quad);
                result.push(item);
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Quad Detection"
    }
}

/// Straighten the card region of the original frame
pub struct RectifyStep;

impl PipelineStep for RectifyStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let Some(quad) = item.quad else {
                continue;
            };
            if let Some(rectified) = rectify::rectify(&item.original, &quad) {
                result.push(item.with_image(DynamicImage::ImageLuma8(rectified)));
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Perspective Correction"
    }
}

/// Trace the ink and redraw it as white strokes on black
pub struct ContourStep;

impl PipelineStep for ContourStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let gray = item.image.to_luma8();
            let contour_image = contours::extract_contour_image(
                &gray,
                context.config.blur_enabled,
                context.config.stroke_width,
            );
            match contour_image {
                Some(img) => result.push(item.with_image(DynamicImage::ImageLuma8(img))),
                None => debug!("No contour on rectified card"),
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Contour Extraction"
    }
}

/// Scale to the configured output width, preserving aspect ratio
pub struct ResizeStep;

impl PipelineStep for ResizeStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let gray = item.image.to_luma8();
            let resized = postprocess::resize_to_width(&gray, context.config.output_width);
            if resized.width() == 0 || resized.height() == 0 {
                continue;
            }
            result.push(item.with_image(DynamicImage::ImageLuma8(resized)));
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Resize"
    }
}

/// Trim the configured border; an empty remainder drops the item
pub struct CropBorderStep;

impl PipelineStep for CropBorderStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let gray = item.image.to_luma8();
            match postprocess::crop_border(&gray, context.config.crop_border) {
                Some(cropped) => result.push(item.with_image(DynamicImage::ImageLuma8(cropped))),
                None => debug!("Crop border left an empty image"),
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Crop Border"
    }
}

/// Classify the postprocessed image.
/// Items are kept even below the threshold so the overlay and thumbnail still show;
/// only confident results get "digit"/"confidence" metadata.
pub struct ClassifyStep {
    classifier: Arc<dyn DigitClassifier>,
}

impl ClassifyStep {
    pub fn new(classifier: Arc<dyn DigitClassifier>) -> Self {
        Self { classifier }
    }
}

impl PipelineStep for ClassifyStep {
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let gray = item.image.to_luma8();
            let prediction = self.classifier.predict(&gray)?;
            trace!(
                "{}: label {} ({:.2})",
                self.classifier.name(),
                prediction.label,
                prediction.confidence
            );

            match classifier::accept(prediction, context.config.confidence_threshold) {
                Some(accepted) => result.push(
                    item.with_metadata("digit", MetadataValue::Int(accepted.digit.value() as i32))
                        .with_metadata("confidence", MetadataValue::Float(accepted.confidence)),
                ),
                None => {
                    debug!(
                        "Label {} below threshold ({:.2} < {:.2})",
                        prediction.label, prediction.confidence, context.config.confidence_threshold
                    );
                    result.push(item);
                }
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Digit Classification"
    }
}
