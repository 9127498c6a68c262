use std::env;

use digitcam::detection::quad::QuadDetector;
use digitcam::detection::steps::*;
use digitcam::{Pipeline, PipelineConfig};
use image::ImageReader;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <image_path>", args[0]);
        std::process::exit(1);
    }

    let img = ImageReader::open(&args[1])?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
    println!("Loaded image: {}x{}", img.width(), img.height());

    // Stricter card detection, stopping before classification
    let detector = QuadDetector {
        blur_sigma: 1.5,
        min_rectangularity: 0.8,
        min_area_fraction: 0.05,
        ..QuadDetector::default()
    };
    let pipeline = Pipeline::new()
        .add_step_boxed(Box::new(QuadDetectionStep { detector }))
        .add_step_boxed(Box::new(RectifyStep))
        .add_step_boxed(Box::new(ContourStep))
        .add_step_boxed(Box::new(ResizeStep))
        .add_step_boxed(Box::new(CropBorderStep));
    println!("Steps: {}", pipeline.step_names().join(" -> "));

    let mut config = PipelineConfig::default();
    config.set_stroke_width(8)?;
    config.set_blur_enabled(false);

    let results = pipeline.run(img.clone(), &config)?;
    match results.first() {
        Some(item) => println!("Digit image: {}x{}", item.image.width(), item.image.height()),
        None => println!("No card found"),
    }

    // Partial run, stop after rectification
    let partial = pipeline.run_partial(img, &config, 2)?;
    if let Some(first) = partial.first() {
        println!("Rectified card: {}x{}", first.image.width(), first.image.height());
        // first.image.save("debug_card.png")?;
    }

    Ok(())
}
