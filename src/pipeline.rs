use image::DynamicImage;
use std::sync::Arc;
use std::collections::HashMap;
use anyhow::Result;
use log::debug;

use crate::config::PipelineConfig;
use crate::models::Quadrilateral;

/// Data that flows through the pipeline
/// Each PipelineData represents one candidate region of a frame with associated metadata
#[derive(Clone)]
pub struct PipelineData {
    /// The image data at the current stage (color frame, rectified card, contour map, ...)
    pub image: DynamicImage,

    /// Reference to the original frame (shared efficiently via Arc)
    pub original: Arc<DynamicImage>,

    /// Card region in the original frame (None means full frame)
    pub quad: Option<Quadrilateral>,

    /// Metadata for tracking properties (e.g., "digit", "confidence", etc.)
    pub metadata: HashMap<String, MetadataValue>,
}

/// Metadata value types
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    Float(f32),
    String(String),
    Int(i32),
}

impl PipelineData {
    /// Create PipelineData for a full frame
    pub fn from_image(image: DynamicImage) -> Self {
        let original = Arc::new(image.clone());
        Self {
            image,
            original,
            quad: None,
            metadata: HashMap::new(),
        }
    }

    /// Same region and metadata, new stage image
    pub fn with_image(&self, image: DynamicImage) -> Self {
        Self {
            image,
            original: self.original.clone(),
            quad: self.quad,
            metadata: self.metadata.clone(),
        }
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get metadata as bool
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as float
    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.metadata.get(key) {
            Some(MetadataValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as int
    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.metadata.get(key) {
            Some(MetadataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as string
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(MetadataValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: std::path::PathBuf,
    /// Whether debug mode is enabled
    pub enabled: bool,
}

/// Context available to all pipeline steps
#[derive(Clone, Default)]
pub struct PipelineContext {
    /// Snapshot of the user parameters for this frame
    pub config: PipelineConfig,
    pub debug: Option<DebugConfig>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, debug: None }
    }
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Process data and return transformed data
    /// Returning no items is a miss: the remaining steps are skipped for this frame
    fn process(&self, data: Vec<PipelineData>, context: &PipelineContext) -> Result<Vec<PipelineData>>;

    /// Human-readable name for this step (used in logs and debug output)
    fn name(&self) -> &str;
}

fn step_dir_name(step_idx: usize, step_name: &str) -> String {
    format!("{:02}_{}", step_idx, step_name.to_lowercase().replace(' ', "_"))
}

/// Composable pipeline builder
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    debug: Option<DebugConfig>,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            debug: None,
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: std::path::PathBuf) -> Result<Self> {
        // Check if directory exists and is empty
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            // Create directory if it doesn't exist
            std::fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig {
            output_dir,
            enabled: true,
        });

        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Helper method to add a step from a Box (for convenience)
    pub fn add_step_boxed(mut self, step: Box<dyn PipelineStep>) -> Self {
        self.steps.push(Arc::from(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    fn save_debug(&self, dir_name: &str, data: &[PipelineData]) -> Result<()> {
        let Some(debug_config) = self.debug.as_ref().filter(|d| d.enabled) else {
            return Ok(());
        };

        let step_dir = debug_config.output_dir.join(dir_name);
        std::fs::create_dir_all(&step_dir)?;

        for (idx, item) in data.iter().enumerate() {
            let filename = format!("{:02}.png", idx + 1);
            item.image.save(step_dir.join(&filename))
                .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))?;
        }

        debug!("Debug: saved {} images to {}/", data.len(), dir_name);
        Ok(())
    }

    fn context(&self, config: &PipelineConfig) -> PipelineContext {
        PipelineContext {
            config: config.clone(),
            debug: self.debug.clone(),
        }
    }

    /// Run the pipeline on one frame with a config snapshot.
    /// Stops at the first step that produces no items.
    pub fn run(&self, input: DynamicImage, config: &PipelineConfig) -> Result<Vec<PipelineData>> {
        self.run_partial(input, config, self.steps.len())
    }

    /// Run the pipeline but stop after `num_steps` steps (useful for debugging)
    pub fn run_partial(
        &self,
        input: DynamicImage,
        config: &PipelineConfig,
        num_steps: usize,
    ) -> Result<Vec<PipelineData>> {
        let context = self.context(config);

        // Start with a single PipelineData containing the full frame
        let mut data = vec![PipelineData::from_image(input)];
        self.save_debug("00_input", &data)?;

        for (step_idx, step) in self.steps.iter().take(num_steps).enumerate() {
            debug!("Running step: {} (processing {} items)", step.name(), data.len());

            data = step.process(data, &context)?;
            self.save_debug(&step_dir_name(step_idx + 1, step.name()), &data)?;

            if data.is_empty() {
                debug!("  → miss at {}, skipping remaining steps", step.name());
                break;
            }
            debug!("  → {} items", data.len());
        }

        Ok(data)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
