use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use tokio::sync::watch;

pub const STROKE_WIDTH_RANGE: RangeInclusive<u32> = 5..=50;
pub const OUTPUT_WIDTH_RANGE: RangeInclusive<u32> = 20..=100;
pub const CROP_BORDER_RANGE: RangeInclusive<u32> = 0..=50;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("crop border {border} must be less than half the output width {output_width}")]
    CropTooWide { border: u32, output_width: u32 },
}

/// User-adjustable parameters read by every frame's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub blur_enabled: bool,
    /// Contour stroke width in pixels
    pub stroke_width: u32,
    /// Width of the image handed to the classifier
    pub output_width: u32,
    pub crop_border: u32,
    pub confidence_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_enabled: true,
            stroke_width: 15,
            output_width: 40,
            crop_border: 0,
            confidence_threshold: 0.75,
        }
    }
}

fn check_range(
    field: &'static str,
    value: u32,
    range: &RangeInclusive<u32>,
) -> Result<u32, ConfigError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            min: range.start().to_string(),
            max: range.end().to_string(),
        })
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("stroke_width", self.stroke_width, &STROKE_WIDTH_RANGE)?;
        check_range("output_width", self.output_width, &OUTPUT_WIDTH_RANGE)?;
        check_range("crop_border", self.crop_border, &CROP_BORDER_RANGE)?;
        self.check_threshold(self.confidence_threshold)?;
        if self.crop_border > 0 && self.crop_border >= self.output_width / 2 {
            return Err(ConfigError::CropTooWide {
                border: self.crop_border,
                output_width: self.output_width,
            });
        }
        Ok(())
    }

    pub fn set_blur_enabled(&mut self, enabled: bool) {
        self.blur_enabled = enabled;
    }

    pub fn set_stroke_width(&mut self, width: u32) -> Result<(), ConfigError> {
        self.stroke_width = check_range("stroke_width", width, &STROKE_WIDTH_RANGE)?;
        Ok(())
    }

    /// Does not revalidate the crop border; an oversized border becomes a
    /// no-op at crop time.
    pub fn set_output_width(&mut self, width: u32) -> Result<(), ConfigError> {
        self.output_width = check_range("output_width", width, &OUTPUT_WIDTH_RANGE)?;
        Ok(())
    }

    /// Rejects borders of half the output width or more, keeping the old value.
    pub fn set_crop_border(&mut self, border: u32) -> Result<(), ConfigError> {
        check_range("crop_border", border, &CROP_BORDER_RANGE)?;
        if border >= self.output_width / 2 {
            return Err(ConfigError::CropTooWide {
                border,
                output_width: self.output_width,
            });
        }
        self.crop_border = border;
        Ok(())
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<(), ConfigError> {
        self.confidence_threshold = self.check_threshold(threshold)?;
        Ok(())
    }

    fn check_threshold(&self, threshold: f32) -> Result<f32, ConfigError> {
        if (0.0..=1.0).contains(&threshold) {
            Ok(threshold)
        } else {
            Err(ConfigError::OutOfRange {
                field: "confidence_threshold",
                value: threshold.to_string(),
                min: "0.0".to_string(),
                max: "1.0".to_string(),
            })
        }
    }
}

/// Live, shareable configuration for one camera pipeline.
/// Readers take a snapshot per frame; edits apply from the next frame.
#[derive(Clone)]
pub struct ConfigHandle {
    sender: watch::Sender<PipelineConfig>,
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> Self {
        let (sender, _) = watch::channel(config);
        Self { sender }
    }

    pub fn snapshot(&self) -> PipelineConfig {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineConfig> {
        self.sender.subscribe()
    }

    /// Apply an edit atomically; a rejected edit leaves the config untouched
    pub fn update<F>(&self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PipelineConfig) -> Result<(), ConfigError>,
    {
        let mut result = Ok(());
        self.sender.send_if_modified(|config| {
            let mut candidate = config.clone();
            result = edit(&mut candidate);
            if result.is_ok() && candidate != *config {
                *config = candidate;
                true
            } else {
                false
            }
        });
        result
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.blur_enabled);
        assert_eq!(config.stroke_width, 15);
        assert_eq!(config.output_width, 40);
        assert_eq!(config.crop_border, 0);
    }

    #[test]
    fn test_crop_border_must_stay_below_half_width() {
        let mut config = PipelineConfig::default();
        assert!(config.set_crop_border(19).is_ok());
        assert_eq!(
            config.set_crop_border(20),
            Err(ConfigError::CropTooWide { border: 20, output_width: 40 })
        );
        // Rejected value leaves the previous one in place
        assert_eq!(config.crop_border, 19);
    }

    #[test]
    fn test_crop_border_uses_integer_half() {
        let mut config = PipelineConfig::default();
        config.set_output_width(21).unwrap();
        assert!(config.set_crop_border(9).is_ok());
        assert!(config.set_crop_border(10).is_err());
    }

    #[test]
    fn test_range_checks() {
        let mut config = PipelineConfig::default();
        assert!(config.set_stroke_width(4).is_err());
        assert!(config.set_stroke_width(50).is_ok());
        assert!(config.set_output_width(101).is_err());
        assert!(config.set_confidence_threshold(1.5).is_err());
        assert!(config.set_confidence_threshold(0.0).is_ok());
        assert_eq!(config.stroke_width, 50);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "stroke_width": 20, "blur_enabled": false }"#).unwrap();
        assert_eq!(config.stroke_width, 20);
        assert!(!config.blur_enabled);
        assert_eq!(config.output_width, 40);
    }

    #[test]
    fn test_handle_rejects_bad_edit_without_notifying() {
        let handle = ConfigHandle::default();
        let mut rx = handle.subscribe();
        assert!(handle.update(|c| c.set_crop_border(30)).is_err());
        assert!(!rx.has_changed().unwrap());

        handle.update(|c| c.set_stroke_width(25)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().stroke_width, 25);
    }
}
