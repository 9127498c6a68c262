pub mod preprocessing;
pub mod quad;
pub mod rectify;
pub mod contours;
pub mod postprocess;
pub mod classifier;
pub mod steps;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;

use crate::config::PipelineConfig;
use crate::detection::classifier::DigitClassifier;
use crate::detection::quad::QuadDetector;
use crate::models::{ClassificationResult, Digit, Frame, FrameOutcome};
use crate::pipeline::{Pipeline, PipelineData};

/// Build the standard per-frame chain: quad → rectify → contour → resize → crop → classify
pub fn build_standard_pipeline(detector: QuadDetector, classifier: Arc<dyn DigitClassifier>) -> Pipeline {
    use crate::detection::steps::*;

    Pipeline::new()
        .add_step(Arc::new(QuadDetectionStep { detector }))
        .add_step(Arc::new(RectifyStep))
        .add_step(Arc::new(ContourStep))
        .add_step(Arc::new(ResizeStep))
        .add_step(Arc::new(CropBorderStep))
        .add_step(Arc::new(ClassifyStep::new(classifier)))
}

/// Digit recognition for a single camera's frames
#[derive(Clone)]
pub struct DigitPipeline {
    pipeline: Pipeline,
}

impl DigitPipeline {
    pub fn new(classifier: Arc<dyn DigitClassifier>) -> Self {
        Self::with_detector(QuadDetector::default(), classifier)
    }

    pub fn with_detector(detector: QuadDetector, classifier: Arc<dyn DigitClassifier>) -> Self {
        Self {
            pipeline: build_standard_pipeline(detector, classifier),
        }
    }

    /// Dump every stage's images under `output_dir`
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        self.pipeline = self.pipeline.with_debug(output_dir)?;
        Ok(self)
    }

    /// Run the full chain on one frame with a config snapshot
    pub fn process_frame(&self, frame: &Frame, config: &PipelineConfig) -> Result<FrameOutcome> {
        self.process_image(frame.image.clone(), config)
    }

    pub fn process_image(&self, image: DynamicImage, config: &PipelineConfig) -> Result<FrameOutcome> {
        let data = self.pipeline.run(image, config)?;
        Ok(data.into_iter().next().map(outcome_from).unwrap_or_default())
    }
}

fn outcome_from(item: PipelineData) -> FrameOutcome {
    let classification = match (item.get_int("digit"), item.get_float("confidence")) {
        (Some(digit), Some(confidence)) => u8::try_from(digit)
            .ok()
            .and_then(|d| Digit::try_from(d).ok())
            .map(|digit| ClassificationResult { digit, confidence }),
        _ => None,
    };

    FrameOutcome {
        quad: item.quad,
        thumbnail: Some(item.image.to_luma8()),
        classification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::classifier::Prediction;
    use image::{GrayImage, Luma};
    use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
    use imageproc::point::Point;
    use imageproc::rect::Rect;

    struct Fixed(f32);

    impl DigitClassifier for Fixed {
        fn predict(&self, _image: &GrayImage) -> Result<Prediction> {
            Ok(Prediction { label: 7, confidence: self.0 })
        }
    }

    fn card_frame() -> DynamicImage {
        let mut img = GrayImage::from_pixel(320, 240, Luma([30u8]));
        let card = [
            Point::new(70, 40),
            Point::new(250, 50),
            Point::new(245, 200),
            Point::new(75, 195),
        ];
        draw_polygon_mut(&mut img, &card, Luma([225u8]));
        draw_filled_rect_mut(&mut img, Rect::at(150, 80).of_size(12, 80), Luma([20u8]));
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_confident_frame_reports_digit() {
        let pipeline = DigitPipeline::new(Arc::new(Fixed(0.80)));
        let outcome = pipeline.process_image(card_frame(), &PipelineConfig::default()).unwrap();

        assert!(outcome.quad.is_some());
        assert_eq!(outcome.digit().map(|d| d.value()), Some(7));
        assert_eq!(outcome.thumbnail.as_ref().unwrap().width(), 40);
    }

    #[test]
    fn test_unconfident_frame_keeps_overlay_but_no_digit() {
        let pipeline = DigitPipeline::new(Arc::new(Fixed(0.50)));
        let outcome = pipeline.process_image(card_frame(), &PipelineConfig::default()).unwrap();

        assert!(outcome.quad.is_some());
        assert!(outcome.thumbnail.is_some());
        assert!(outcome.digit().is_none());
    }

    #[test]
    fn test_empty_scene_is_a_miss() {
        let pipeline = DigitPipeline::new(Arc::new(Fixed(1.0)));
        let frame = DynamicImage::ImageLuma8(GrayImage::from_pixel(320, 240, Luma([90u8])));
        let outcome = pipeline.process_image(frame, &PipelineConfig::default()).unwrap();
        assert!(outcome.is_miss());
    }

    #[test]
    fn test_crop_border_shrinks_thumbnail() {
        let pipeline = DigitPipeline::new(Arc::new(Fixed(0.9)));
        let mut config = PipelineConfig::default();
        config.set_crop_border(5).unwrap();
        let outcome = pipeline.process_image(card_frame(), &config).unwrap();
        assert_eq!(outcome.thumbnail.unwrap().width(), 30);
    }
}
