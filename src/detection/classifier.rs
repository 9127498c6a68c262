use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, Tensor};
use std::path::Path;

/// Side of the square classifier input
pub const INPUT_SIZE: u32 = 28;
/// Longest side of the digit inside the input square
pub const DIGIT_BOX: u32 = 20;

/// Top label of one classifier run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u8,
    pub confidence: f32,
}

/// A fixed, pretrained 10-class digit classifier
pub trait DigitClassifier: Send + Sync {
    /// Run one image through the model and return the highest-confidence label
    fn predict(&self, image: &GrayImage) -> Result<Prediction>;

    fn name(&self) -> &str {
        "digit classifier"
    }
}

/// Normalize raw scores to probabilities. Scores that already form a
/// distribution are returned unchanged.
pub fn to_probabilities(scores: &[f32]) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let is_distribution = scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        scores.to_vec()
    } else {
        softmax(scores)
    }
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// Highest-scoring label; None for empty input or NaN scores
pub fn top_prediction(probabilities: &[f32]) -> Option<Prediction> {
    probabilities
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(label, &confidence)| Prediction {
            label: label as u8,
            confidence,
        })
}

/// Center the digit in a black square, MNIST style
pub fn letterbox(image: &GrayImage, size: u32, digit_box: u32) -> GrayImage {
    let mut canvas = GrayImage::from_pixel(size, size, Luma([0u8]));
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return canvas;
    }

    // Calculate scaling to fit within the digit box while maintaining aspect ratio
    let scale = (digit_box as f32 / width as f32).min(digit_box as f32 / height as f32);
    let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);

    let offset_x = (size - scaled_w) / 2;
    let offset_y = (size - scaled_h) / 2;
    imageops::overlay(&mut canvas, &scaled, offset_x.into(), offset_y.into());
    canvas
}

/// Gate a prediction on the confidence threshold
pub fn accept(prediction: Prediction, threshold: f32) -> Option<crate::models::ClassificationResult> {
    if prediction.confidence < threshold {
        return None;
    }
    let digit = crate::models::Digit::try_from(prediction.label).ok()?;
    Some(crate::models::ClassificationResult {
        digit,
        confidence: prediction.confidence,
    })
}

/// Run the classifier and keep its label only if confidence >= threshold
pub fn classify(
    classifier: &dyn DigitClassifier,
    image: &GrayImage,
    threshold: f32,
) -> Result<Option<crate::models::ClassificationResult>> {
    let prediction = classifier.predict(image)?;
    Ok(accept(prediction, threshold))
}

/// MNIST-style model hosted with rten: input `[1, 1, 28, 28]` in 0..1, ten outputs
pub struct RtenDigitClassifier {
    model: Model,
    input_size: u32,
}

impl RtenDigitClassifier {
    /// Load the model file once; weights are never mutated afterwards
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Digit model not found: {}", path.display());
        }
        let model = Model::load_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load digit model {}: {}", path.display(), e))?;
        Ok(Self {
            model,
            input_size: INPUT_SIZE,
        })
    }
}

impl DigitClassifier for RtenDigitClassifier {
    fn predict(&self, image: &GrayImage) -> Result<Prediction> {
        let canvas = letterbox(image, self.input_size, DIGIT_BOX);
        let size = self.input_size as usize;
        let data: Vec<f32> = canvas.pixels().map(|p| p[0] as f32 / 255.0).collect();

        let input = NdTensor::from_data([1, 1, size, size], data);
        let output = self.model.run_one(input.view().into(), None)?;
        let scores: Tensor<f32> = output.try_into()?;
        let scores = scores.to_vec();
        if scores.len() != 10 {
            anyhow::bail!("Digit model returned {} scores, expected 10", scores.len());
        }

        top_prediction(&to_probabilities(&scores))
            .ok_or_else(|| anyhow::anyhow!("Digit model returned no usable scores"))
    }

    fn name(&self) -> &str {
        "rten digit classifier"
    }
}
