mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use digitcam::DirectoryCaptureService;
use digitcam::core::capture::CaptureSession;
use digitcam::models::Frame;
use tokio::sync::watch;

async fn next_frame(rx: &mut watch::Receiver<Option<Frame>>) -> anyhow::Result<Frame> {
    tokio::time::timeout(Duration::from_secs(5), rx.changed()).await??;
    rx.borrow_and_update()
        .clone()
        .ok_or_else(|| anyhow::anyhow!("empty frame slot"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_device_delivers_resized_frames() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let small = image::DynamicImage::ImageLuma8(image::GrayImage::new(320, 240));
    write_device(dir.path(), "cam", &[small])?;

    let service: Arc<dyn CaptureService> = Arc::new(DirectoryCaptureService::new(dir.path()));
    let device = service.devices()?.remove(0);
    let (tx, mut rx) = watch::channel(None);
    let session = CaptureSession::start(service, device, CaptureSettings::default(), tx).await?;
    assert_eq!(session.frame_rate(), Some(20.0));

    let frame = next_frame(&mut rx).await?;
    assert_eq!((frame.width(), frame.height()), (640, 480));
    assert_eq!(frame.sequence, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_busy_consumer_gets_newest_frame() -> anyhow::Result<()> {
    let service = MemoryCaptureService::new()
        .with_device("cam", vec![blank_frame()])
        .shared();
    let device = service.devices()?.remove(0);
    let settings = CaptureSettings {
        frame_rate: 50.0,
        ..CaptureSettings::default()
    };
    let (tx, mut rx) = watch::channel(None);
    let _session = CaptureSession::start(service, device, settings, tx).await?;

    // Busy consumer: several frame periods pass without reading
    tokio::time::sleep(Duration::from_millis(300)).await;
    let frame = next_frame(&mut rx).await?;

    assert!(frame.sequence > 5, "got stale frame {}", frame.sequence);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopped_session_delivers_nothing() -> anyhow::Result<()> {
    let service = MemoryCaptureService::new()
        .with_device("cam", vec![blank_frame()])
        .shared();
    let device = service.devices()?.remove(0);
    let (tx, mut rx) = watch::channel(None);
    let session = CaptureSession::start(service, device, CaptureSettings::default(), tx).await?;

    session.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!session.is_running());

    // The slot's sender went away with the task
    rx.borrow_and_update();
    let changed = tokio::time::timeout(Duration::from_secs(5), rx.changed()).await?;
    assert!(changed.is_err());
    Ok(())
}
