//! Frame sources and capture sessions.
//!
//! A [`CaptureService`] enumerates devices and opens them; a [`CaptureSession`]
//! paces one device's frames into a latest-frame slot on a background task.
//! A frame the consumer has not taken yet is overwritten by the next one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, error, info, trace, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::Frame;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Highest frame rate accepted from a device description or the command line
pub const MAX_FRAME_RATE: f64 = 1000.0;

/// Shortest pacing interval between two frames
pub const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Supported frame rates of a device, inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateRange {
    pub min: f64,
    pub max: f64,
}

impl FrameRateRange {
    pub fn fixed(rate: f64) -> Self {
        Self { min: rate, max: rate }
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.min && rate <= self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub path: PathBuf,
    pub frame_rates: Vec<FrameRateRange>,
}

/// Requested capture format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 20.0,
        }
    }
}

/// Check a single rate: finite, positive and at most [`MAX_FRAME_RATE`]
pub fn validate_frame_rate(rate: f64) -> Result<f64> {
    if !rate.is_finite() || rate <= 0.0 || rate > MAX_FRAME_RATE {
        anyhow::bail!("Frame rate {} is outside 0-{} fps", rate, MAX_FRAME_RATE);
    }
    Ok(rate)
}

/// Pacing interval for a frame rate, never shorter than [`MIN_FRAME_PERIOD`]
pub fn frame_period(rate: f64) -> Duration {
    // NaN.max(1.0) is 1.0
    Duration::from_secs_f64(1.0 / rate.max(1.0)).max(MIN_FRAME_PERIOD)
}

/// Pick the frame rate to run a device at.
///
/// Ranges are tried from the last one: a fixed range equal to the request or a
/// range containing it selects the request. Otherwise the nearest supported
/// bound is used. `None` leaves the device at its default rate.
pub fn negotiate_frame_rate(ranges: &[FrameRateRange], requested: f64) -> Option<f64> {
    for range in ranges.iter().rev() {
        if range.min == range.max {
            if requested.trunc() == range.min.trunc() {
                return Some(range.min);
            }
        } else if range.contains(requested) {
            return Some(requested);
        }
    }

    let nearest = ranges
        .iter()
        .map(|r| requested.clamp(r.min, r.max))
        .min_by(|a, b| {
            (a - requested)
                .abs()
                .partial_cmp(&(b - requested).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    match nearest {
        Some(rate) => {
            warn!("Requested {} fps is not supported, using {} fps", requested, rate);
            Some(rate)
        }
        None => {
            warn!("Device reports no frame rates, keeping its default");
            None
        }
    }
}

/// Produces raw frames from one opened device
pub trait FrameSource: Send {
    /// Next frame, or None when the device has nothing more to deliver
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}

/// Enumerates and opens capture devices
pub trait CaptureService: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open(&self, device: &DeviceInfo, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>>;
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parse an `fps` file: one rate (`20`) or range (`5-30`) per line
pub fn parse_frame_rates(text: &str) -> Result<Vec<FrameRateRange>> {
    let mut ranges = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
        let range = match line.split_once('-') {
            Some((min, max)) => FrameRateRange {
                min: min.trim().parse()?,
                max: max.trim().parse()?,
            },
            None => FrameRateRange::fixed(line.parse()?),
        };
        validate_frame_rate(range.min).and_then(|_| validate_frame_rate(range.max))
            .map_err(|e| anyhow::anyhow!("Invalid frame rate range '{}': {}", line, e))?;
        if range.min > range.max {
            anyhow::bail!("Invalid frame rate range: {}", line);
        }
        ranges.push(range);
    }
    Ok(ranges)
}

/// Devices backed by directories of still images.
/// Each sub-directory of `root` is one device; its images, sorted by name, are
/// played in a loop.
pub struct DirectoryCaptureService {
    root: PathBuf,
}

impl DirectoryCaptureService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CaptureService for DirectoryCaptureService {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.root)
            .map_err(|e| anyhow::anyhow!("Failed to list devices in {}: {}", self.root.display(), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut devices = Vec::new();
        for (index, path) in dirs.into_iter().enumerate() {
            let fps_file = path.join("fps");
            let frame_rates = if fps_file.exists() {
                parse_frame_rates(&std::fs::read_to_string(&fps_file)?)?
            } else {
                vec![FrameRateRange { min: 1.0, max: 60.0 }]
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("device {}", index));
            devices.push(DeviceInfo {
                index,
                name,
                path,
                frame_rates,
            });
        }
        Ok(devices)
    }

    fn open(&self, device: &DeviceInfo, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&device.path)
            .map_err(|e| anyhow::anyhow!("Failed to open device {}: {}", device.name, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        files.sort();

        if files.is_empty() {
            anyhow::bail!("Device {} has no frames", device.name);
        }

        Ok(Box::new(ImageSequence {
            files,
            position: 0,
            width: settings.width,
            height: settings.height,
        }))
    }
}

/// Loops over a list of image files
struct ImageSequence {
    files: Vec<PathBuf>,
    position: usize,
    width: u32,
    height: u32,
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let path = &self.files[self.position % self.files.len()];
        self.position = (self.position + 1) % self.files.len();

        let img = image::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to decode frame {}: {}", path.display(), e))?;
        if img.width() == self.width && img.height() == self.height {
            Ok(Some(img))
        } else {
            Ok(Some(img.resize_exact(self.width, self.height, FilterType::Triangle)))
        }
    }
}

/// A running capture: frames are delivered on a background task until stopped
pub struct CaptureSession {
    device: DeviceInfo,
    frame_rate: Option<f64>,
    task: JoinHandle<()>,
}

impl CaptureSession {
    /// Open `device` on the blocking pool and start publishing frames into `frames`.
    /// Each new frame replaces the previous one, taken or not.
    pub async fn start(
        service: Arc<dyn CaptureService>,
        device: DeviceInfo,
        settings: CaptureSettings,
        frames: watch::Sender<Option<Frame>>,
    ) -> Result<Self> {
        let opening = device.clone();
        let source = tokio::task::spawn_blocking(move || service.open(&opening, &settings))
            .await
            .map_err(|e| anyhow::anyhow!("Opening {} failed: {}", device.name, e))??;
        let frame_rate = negotiate_frame_rate(&device.frame_rates, settings.frame_rate);
        let period = frame_period(frame_rate.unwrap_or(settings.frame_rate));

        info!(
            "Capture started on {} at {}x{} ({} fps)",
            device.name,
            settings.width,
            settings.height,
            frame_rate.map(|r| r.to_string()).unwrap_or_else(|| "default".to_string())
        );

        let name = device.name.clone();
        let task = tokio::spawn(deliver_frames(name, source, period, frames));

        Ok(Self {
            device,
            frame_rate,
            task,
        })
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop frame delivery without waiting for a frame in flight
    pub fn stop(&self) {
        if !self.task.is_finished() {
            debug!("Stopping capture on {}", self.device.name);
        }
        self.task.abort();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn deliver_frames(
    name: String,
    mut source: Box<dyn FrameSource>,
    period: Duration,
    frames: watch::Sender<Option<Frame>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sequence = 0u64;

    loop {
        ticker.tick().await;

        let read = tokio::task::spawn_blocking(move || {
            let next = source.next_frame();
            (source, next)
        })
        .await;

        let next = match read {
            Ok((returned, next)) => {
                source = returned;
                next
            }
            Err(e) => {
                error!("Capture on {} failed: {}", name, e);
                return;
            }
        };

        let image = match next {
            Ok(Some(image)) => image,
            Ok(None) => {
                info!("Capture on {} reached the end of its frames", name);
                return;
            }
            Err(e) => {
                warn!("Dropping unreadable frame on {}: {}", name, e);
                continue;
            }
        };

        sequence += 1;
        if frames.is_closed() {
            debug!("Frame consumer for {} is gone", name);
            return;
        }
        // A frame still waiting here is stale and is overwritten
        frames.send_replace(Some(Frame::new(image, sequence)));
        trace!("Frame {} ready on {}", sequence, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_fixed_rate_is_used() {
        let ranges = [FrameRateRange::fixed(15.0), FrameRateRange::fixed(20.0), FrameRateRange::fixed(30.0)];
        assert_eq!(negotiate_frame_rate(&ranges, 20.0), Some(20.0));
    }

    #[test]
    fn test_rate_inside_range_is_used() {
        let ranges = [FrameRateRange { min: 5.0, max: 30.0 }];
        assert_eq!(negotiate_frame_rate(&ranges, 20.0), Some(20.0));
    }

    #[test]
    fn test_unsupported_rate_falls_back_to_nearest() {
        let ranges = [FrameRateRange::fixed(15.0), FrameRateRange::fixed(30.0)];
        assert_eq!(negotiate_frame_rate(&ranges, 20.0), Some(15.0));

        let ranges = [FrameRateRange { min: 25.0, max: 60.0 }];
        assert_eq!(negotiate_frame_rate(&ranges, 20.0), Some(25.0));
    }

    #[test]
    fn test_no_ranges_keeps_default() {
        assert_eq!(negotiate_frame_rate(&[], 20.0), None);
    }

    #[test]
    fn test_parse_frame_rates() {
        let ranges = parse_frame_rates("# supported\n15\n5-30\n\n").unwrap();
        assert_eq!(ranges, vec![FrameRateRange::fixed(15.0), FrameRateRange { min: 5.0, max: 30.0 }]);
        assert!(parse_frame_rates("30-5").is_err());
        assert!(parse_frame_rates("fast").is_err());
    }

    #[test]
    fn test_absurd_frame_rates_are_rejected() {
        assert!(parse_frame_rates("inf").is_err());
        assert!(parse_frame_rates("1000000000000").is_err());
        assert!(parse_frame_rates("5-1e12").is_err());
        assert!(parse_frame_rates("NaN").is_err());
        assert!(parse_frame_rates("0").is_err());
        assert_eq!(parse_frame_rates("1000").unwrap(), vec![FrameRateRange::fixed(1000.0)]);
    }

    #[test]
    fn test_fps_file_with_huge_rate_fails_device_listing() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("cam")).unwrap();
        std::fs::write(dir.path().join("cam/fps"), "1000000000000\n").unwrap();
        assert!(DirectoryCaptureService::new(dir.path()).devices().is_err());
    }

    #[test]
    fn test_frame_period_is_never_zero() {
        assert_eq!(frame_period(1e12), MIN_FRAME_PERIOD);
        assert_eq!(frame_period(f64::INFINITY), MIN_FRAME_PERIOD);
        assert_eq!(frame_period(f64::NAN), Duration::from_secs(1));
        assert_eq!(frame_period(0.0), Duration::from_secs(1));
        assert_eq!(frame_period(20.0), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_device_reporting_huge_rate_still_delivers() {
        let dir = tempfile::TempDir::new().unwrap();
        let cam = dir.path().join("cam");
        std::fs::create_dir(&cam).unwrap();
        image::GrayImage::new(8, 8).save(cam.join("001.png")).unwrap();

        let service: Arc<dyn CaptureService> = Arc::new(DirectoryCaptureService::new(dir.path()));
        let mut device = service.devices().unwrap().remove(0);
        device.frame_rates = vec![FrameRateRange::fixed(1e12)];
        let settings = CaptureSettings { width: 8, height: 8, frame_rate: 1e12 };

        let (tx, mut rx) = watch::channel(None);
        let session = CaptureSession::start(service, device, settings, tx).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.changed()).await.unwrap().unwrap();
        assert!(rx.borrow().is_some());
        assert!(session.is_running());
    }

    #[test]
    fn test_directory_devices_are_sorted_subdirectories() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("b_cam")).unwrap();
        std::fs::create_dir(dir.path().join("a_cam")).unwrap();
        std::fs::write(dir.path().join("a_cam/fps"), "20\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a device").unwrap();

        let devices = DirectoryCaptureService::new(dir.path()).devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "a_cam");
        assert_eq!(devices[0].frame_rates, vec![FrameRateRange::fixed(20.0)]);
        assert_eq!(devices[1].index, 1);
    }

    #[test]
    fn test_empty_device_fails_to_open() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("cam")).unwrap();
        let service = DirectoryCaptureService::new(dir.path());
        let device = service.devices().unwrap().remove(0);
        assert!(service.open(&device, &CaptureSettings::default()).is_err());
    }

    #[test]
    fn test_sequence_loops_and_resizes() {
        let dir = tempfile::TempDir::new().unwrap();
        let cam = dir.path().join("cam");
        std::fs::create_dir(&cam).unwrap();
        image::GrayImage::new(10, 10).save(cam.join("001.png")).unwrap();
        image::GrayImage::new(20, 20).save(cam.join("002.png")).unwrap();

        let service = DirectoryCaptureService::new(dir.path());
        let device = service.devices().unwrap().remove(0);
        let settings = CaptureSettings { width: 32, height: 24, frame_rate: 20.0 };
        let mut source = service.open(&device, &settings).unwrap();
        for _ in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!((frame.width(), frame.height()), (32, 24));
        }
    }
}
