use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ConfigHandle;
use crate::core::capture::{CaptureService, CaptureSession, CaptureSettings, DeviceInfo};
use crate::detection::DigitPipeline;
use crate::models::{Digit, Frame, FrameOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No device selected, or the device failed to start
    Idle,
    /// Frames flowing, waiting for the next one
    Capturing,
    /// Running detection on a frame
    Detecting,
}

/// Latest published result of one camera
#[derive(Debug, Clone, Default)]
pub struct CameraReport {
    /// Capture session that produced this report
    pub session: Option<Uuid>,
    /// Sequence number of the frame, 0 before the first frame
    pub frame: u64,
    pub outcome: FrameOutcome,
}

impl CameraReport {
    pub fn digit(&self) -> Option<Digit> {
        self.outcome.digit()
    }
}

struct ActiveSession {
    id: Uuid,
    capture: CaptureSession,
    worker: JoinHandle<()>,
}

impl ActiveSession {
    fn shutdown(self) {
        self.capture.stop();
        // In-flight detection is abandoned; its result is never published
        self.worker.abort();
    }
}

/// One camera's capture and detection, independent of every other camera
pub struct CameraPipeline {
    name: String,
    service: Arc<dyn CaptureService>,
    settings: CaptureSettings,
    config: ConfigHandle,
    detector: Option<DigitPipeline>,
    state: watch::Sender<PipelineState>,
    reports: watch::Sender<CameraReport>,
    active: Mutex<Option<ActiveSession>>,
}

impl CameraPipeline {
    /// `detector` is None when setup failed (e.g. missing model); the camera then
    /// never reports a digit.
    pub fn new(
        name: impl Into<String>,
        service: Arc<dyn CaptureService>,
        settings: CaptureSettings,
        config: ConfigHandle,
        detector: Option<DigitPipeline>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        let (reports, _) = watch::channel(CameraReport::default());
        Self {
            name: name.into(),
            service,
            settings,
            config,
            detector,
            state,
            reports,
            active: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraReport> {
        self.reports.subscribe()
    }

    pub fn latest(&self) -> CameraReport {
        self.reports.borrow().clone()
    }

    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.service.devices()
    }

    pub fn current_device(&self) -> Option<DeviceInfo> {
        self.lock_active()
            .as_ref()
            .map(|s| s.capture.device().clone())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        // A panic while holding the lock cannot leave the session half-updated
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tear down the current session and start capturing from `device`.
    /// The displayed digit is cleared until the new device's first detection.
    /// The device is opened on the blocking pool, without holding the session lock.
    pub async fn select_device(&self, device: DeviceInfo) -> Result<()> {
        let id = Uuid::new_v4();
        {
            let mut active = self.lock_active();
            if let Some(previous) = active.take() {
                info!("[{}] Switching away from {}", self.name, previous.capture.device().name);
                previous.shutdown();
            }
            self.reports.send_replace(CameraReport {
                session: Some(id),
                frame: 0,
                outcome: FrameOutcome::miss(),
            });
            self.state.send_replace(PipelineState::Idle);
        }

        let Some(detector) = self.detector.clone() else {
            error!("[{}] Digit classifier unavailable, camera stays idle", self.name);
            anyhow::bail!("{}: digit classifier unavailable", self.name);
        };

        let (frame_tx, frame_rx) = watch::channel(None);
        let capture = match CaptureSession::start(self.service.clone(), device.clone(), self.settings, frame_tx).await {
            Ok(capture) => capture,
            Err(e) => {
                error!("[{}] Failed to start {}: {}", self.name, device.name, e);
                return Err(e);
            }
        };

        let mut active = self.lock_active();
        if self.reports.borrow().session != Some(id) {
            // Another switch or a stop happened while the device was opening
            debug!("[{}] Session {} superseded before it started", self.name, id);
            capture.stop();
            return Ok(());
        }

        let worker = tokio::spawn(detect_frames(
            self.name.clone(),
            id,
            detector,
            self.config.clone(),
            frame_rx,
            self.state.clone(),
            self.reports.clone(),
        ));

        self.state.send_replace(PipelineState::Capturing);
        *active = Some(ActiveSession { id, capture, worker });
        info!("[{}] Session {} started on {}", self.name, id, device.name);
        Ok(())
    }

    /// Select a device by its index in `devices()`
    pub async fn select_device_index(&self, index: usize) -> Result<()> {
        let service = self.service.clone();
        let devices = tokio::task::spawn_blocking(move || service.devices())
            .await
            .map_err(|e| anyhow::anyhow!("{}: listing devices failed: {}", self.name, e))??;
        let device = devices
            .into_iter()
            .find(|d| d.index == index)
            .ok_or_else(|| anyhow::anyhow!("{}: no device with index {}", self.name, index))?;
        self.select_device(device).await
    }

    /// Stop capturing; the camera returns to Idle and its digit is cleared
    pub fn stop(&self) {
        let mut active = self.lock_active();
        if let Some(session) = active.take() {
            debug!("[{}] Stopping session {}", self.name, session.id);
            session.shutdown();
        }
        self.reports.send_replace(CameraReport::default());
        self.state.send_replace(PipelineState::Idle);
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        if let Some(session) = self.lock_active().take() {
            session.shutdown();
        }
    }
}

/// Move the camera to `next` only while `session` is still the published one.
/// The check runs under the report lock, so it cannot interleave with a
/// device switch or a stop replacing the report.
fn set_state_if_current(
    reports: &watch::Sender<CameraReport>,
    state: &watch::Sender<PipelineState>,
    session: Uuid,
    next: PipelineState,
) -> bool {
    let mut current = false;
    reports.send_if_modified(|report| {
        current = report.session == Some(session);
        if current {
            state.send_replace(next);
        }
        false
    });
    current
}

async fn detect_frames(
    name: String,
    session: Uuid,
    detector: DigitPipeline,
    config: ConfigHandle,
    mut frames: watch::Receiver<Option<Frame>>,
    state: watch::Sender<PipelineState>,
    reports: watch::Sender<CameraReport>,
) {
    while frames.changed().await.is_ok() {
        // Always the newest frame; anything captured meanwhile was overwritten
        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };
        let sequence = frame.sequence;
        // Edits made while a frame is running apply from the next frame
        let snapshot = config.snapshot();
        if !set_state_if_current(&reports, &state, session, PipelineState::Detecting) {
            debug!("[{}] Session {} superseded, stopping", name, session);
            return;
        }

        let job = detector.clone();
        let outcome = match tokio::task::spawn_blocking(move || job.process_frame(&frame, &snapshot)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("[{}] Frame {} failed: {}", name, sequence, e);
                FrameOutcome::miss()
            }
            Err(e) => {
                error!("[{}] Detection task failed on frame {}: {}", name, sequence, e);
                FrameOutcome::miss()
            }
        };

        let published = reports.send_if_modified(|current| {
            if current.session != Some(session) {
                return false;
            }
            *current = CameraReport {
                session: Some(session),
                frame: sequence,
                outcome,
            };
            state.send_replace(PipelineState::Capturing);
            true
        });
        if !published {
            debug!("[{}] Session {} superseded, stopping", name, session);
            return;
        }
    }
    debug!("[{}] Frame delivery ended for session {}", name, session);
}
