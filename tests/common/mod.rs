mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from digitcam for tests
pub use digitcam::core::capture::{CaptureService, CaptureSettings, DeviceInfo, FrameRateRange, FrameSource};
pub use digitcam::{
    Aggregator, CameraPipeline, CameraReport, ConfigHandle, DigitClassifier, DigitPipeline, PipelineConfig,
    PipelineState,
};
