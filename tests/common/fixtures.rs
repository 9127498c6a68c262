use std::sync::Arc;
use std::time::Duration;

use digitcam::core::capture::{CaptureService, CaptureSettings, DeviceInfo, FrameRateRange, FrameSource};
use digitcam::detection::classifier::{DigitClassifier, Prediction};
use digitcam::{CameraReport, DigitPipeline};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use tokio::sync::watch;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// A light, slightly skewed card with one dark vertical stroke on a dark background
pub fn card_frame() -> DynamicImage {
    let mut img = GrayImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Luma([30u8]));
    let card = [
        Point::new(140, 80),
        Point::new(500, 100),
        Point::new(490, 400),
        Point::new(150, 390),
    ];
    draw_polygon_mut(&mut img, &card, Luma([225u8]));
    draw_filled_rect_mut(&mut img, Rect::at(300, 160).of_size(24, 160), Luma([20u8]));
    DynamicImage::ImageLuma8(img)
}

/// Nothing card-like in view
pub fn blank_frame() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Luma([90u8])))
}

/// Always predicts the same label with the same confidence
pub struct FixedClassifier {
    pub label: u8,
    pub confidence: f32,
}

impl DigitClassifier for FixedClassifier {
    fn predict(&self, _image: &GrayImage) -> anyhow::Result<Prediction> {
        Ok(Prediction {
            label: self.label,
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Fixed answer after a delay, standing in for a slow model
pub struct SlowClassifier {
    pub label: u8,
    pub delay: Duration,
}

impl DigitClassifier for SlowClassifier {
    fn predict(&self, _image: &GrayImage) -> anyhow::Result<Prediction> {
        std::thread::sleep(self.delay);
        Ok(Prediction {
            label: self.label,
            confidence: 1.0,
        })
    }
}

pub fn fixed_pipeline(label: u8, confidence: f32) -> DigitPipeline {
    DigitPipeline::new(Arc::new(FixedClassifier { label, confidence }))
}

/// Capture devices that replay frames held in memory
pub struct MemoryCaptureService {
    devices: Vec<(String, Vec<DynamicImage>)>,
    open_delay: Duration,
}

impl MemoryCaptureService {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            open_delay: Duration::ZERO,
        }
    }

    /// Make `open` block the calling thread, like a slow device
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_device(mut self, name: &str, frames: Vec<DynamicImage>) -> Self {
        self.devices.push((name.to_string(), frames));
        self
    }

    pub fn shared(self) -> Arc<dyn CaptureService> {
        Arc::new(self)
    }
}

impl CaptureService for MemoryCaptureService {
    fn devices(&self) -> anyhow::Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, (name, _))| DeviceInfo {
                index,
                name: name.clone(),
                path: format!("memory://{}", name).into(),
                frame_rates: vec![FrameRateRange { min: 1.0, max: 60.0 }],
            })
            .collect())
    }

    fn open(&self, device: &DeviceInfo, _settings: &CaptureSettings) -> anyhow::Result<Box<dyn FrameSource>> {
        std::thread::sleep(self.open_delay);
        let (_, frames) = self
            .devices
            .get(device.index)
            .ok_or_else(|| anyhow::anyhow!("No device {}", device.index))?;
        if frames.is_empty() {
            anyhow::bail!("Device {} has no frames", device.name);
        }
        Ok(Box::new(Replay {
            frames: frames.clone(),
            position: 0,
        }))
    }
}

struct Replay {
    frames: Vec<DynamicImage>,
    position: usize,
}

impl FrameSource for Replay {
    fn next_frame(&mut self) -> anyhow::Result<Option<DynamicImage>> {
        let frame = self.frames[self.position % self.frames.len()].clone();
        self.position += 1;
        Ok(Some(frame))
    }
}

/// Writes `frames` as PNGs into `root/name`, one directory per device
pub fn write_device(root: &std::path::Path, name: &str, frames: &[DynamicImage]) -> anyhow::Result<()> {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir)?;
    for (i, frame) in frames.iter().enumerate() {
        frame.save(dir.join(format!("{:03}.png", i + 1)))?;
    }
    Ok(())
}

/// Wait until a published report satisfies `predicate`
pub async fn wait_for_report<F>(
    reports: &mut watch::Receiver<CameraReport>,
    predicate: F,
) -> anyhow::Result<CameraReport>
where
    F: Fn(&CameraReport) -> bool,
{
    let wait = async {
        loop {
            {
                let report = reports.borrow_and_update();
                if predicate(&report) {
                    return Ok::<_, anyhow::Error>(report.clone());
                }
            }
            reports.changed().await?;
        }
    };
    Ok(tokio::time::timeout(Duration::from_secs(10), wait).await??)
}
