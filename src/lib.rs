pub mod config;
pub mod core;
pub mod detection;
pub mod models;
pub mod pipeline;

pub use config::{ConfigError, ConfigHandle, PipelineConfig};
pub use crate::core::aggregator::{Aggregator, DigitSum, sum_digits};
pub use crate::core::camera::{CameraPipeline, CameraReport, PipelineState};
pub use crate::core::capture::{CaptureService, CaptureSettings, DeviceInfo, DirectoryCaptureService};
pub use detection::DigitPipeline;
pub use detection::classifier::{DigitClassifier, RtenDigitClassifier};
pub use models::{ClassificationResult, Digit, Frame, FrameOutcome, Quadrilateral};
pub use pipeline::{DebugConfig, MetadataValue, Pipeline, PipelineContext, PipelineData, PipelineStep};
