use std::env;
use std::path::Path;
use std::sync::Arc;

use digitcam::{DigitClassifier, DigitPipeline, PipelineConfig, RtenDigitClassifier};
use image::ImageReader;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <image_path> <model.rten>", args[0]);
        std::process::exit(1);
    }

    let img = ImageReader::open(&args[1])?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
    println!("Loaded image: {}x{}", img.width(), img.height());

    let classifier: Arc<dyn DigitClassifier> = Arc::new(RtenDigitClassifier::load(Path::new(&args[2]))?);
    let pipeline = DigitPipeline::new(classifier);

    // Same frame at two thresholds
    for threshold in [0.75, 0.5] {
        let mut config = PipelineConfig::default();
        config.set_confidence_threshold(threshold)?;
        let outcome = pipeline.process_image(img.clone(), &config)?;

        match (&outcome.quad, outcome.classification) {
            (None, _) => println!("threshold {:.2}: no card", threshold),
            (Some(_), None) => println!("threshold {:.2}: card found, no confident digit", threshold),
            (Some(_), Some(c)) => println!("threshold {:.2}: digit {} (conf: {:.2})", threshold, c.digit, c.confidence),
        }
    }

    Ok(())
}
