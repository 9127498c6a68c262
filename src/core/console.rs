//! Text control surface and display formatting for the live mode

use anyhow::{Result, bail};

use crate::config::{ConfigError, PipelineConfig};
use crate::core::aggregator::DigitSum;
use crate::core::camera::CameraReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Left,
    Right,
    Both,
}

impl Target {
    pub fn includes_left(self) -> bool {
        matches!(self, Target::Left | Target::Both)
    }

    pub fn includes_right(self) -> bool {
        matches!(self, Target::Right | Target::Both)
    }
}

/// A live edit of one config field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigEdit {
    Blur(bool),
    StrokeWidth(u32),
    OutputWidth(u32),
    CropBorder(u32),
    Confidence(f32),
}

impl ConfigEdit {
    pub fn apply(self, config: &mut PipelineConfig) -> Result<(), ConfigError> {
        match self {
            ConfigEdit::Blur(enabled) => {
                config.set_blur_enabled(enabled);
                Ok(())
            }
            ConfigEdit::StrokeWidth(width) => config.set_stroke_width(width),
            ConfigEdit::OutputWidth(width) => config.set_output_width(width),
            ConfigEdit::CropBorder(border) => config.set_crop_border(border),
            ConfigEdit::Confidence(threshold) => config.set_confidence_threshold(threshold),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Edit(Target, ConfigEdit),
    SelectDevice(Target, usize),
    ListDevices,
    Show,
    Quit,
}

fn parse_target(word: &str) -> Result<Target> {
    match word {
        "left" | "l" | "1" => Ok(Target::Left),
        "right" | "r" | "2" => Ok(Target::Right),
        "both" | "all" => Ok(Target::Both),
        other => bail!("Unknown camera '{}', expected left, right or both", other),
    }
}

fn parse_switch(word: &str) -> Result<bool> {
    match word {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => bail!("Expected on or off, got '{}'", other),
    }
}

impl ConsoleCommand {
    /// Parse one input line, e.g. `left stroke 20` or `right device 1`
    pub fn parse(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["quit"] | ["exit"] | ["q"] => Ok(ConsoleCommand::Quit),
            ["devices"] => Ok(ConsoleCommand::ListDevices),
            ["show"] | ["status"] => Ok(ConsoleCommand::Show),
            [target, "device", index] => {
                let target = parse_target(target)?;
                if target == Target::Both {
                    bail!("Select a device for one camera at a time");
                }
                let index = index
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid device index '{}'", index))?;
                Ok(ConsoleCommand::SelectDevice(target, index))
            }
            [target, field, value] => {
                let target = parse_target(target)?;
                let edit = match *field {
                    "blur" => ConfigEdit::Blur(parse_switch(value)?),
                    "stroke" => ConfigEdit::StrokeWidth(value.parse()?),
                    "width" => ConfigEdit::OutputWidth(value.parse()?),
                    "crop" => ConfigEdit::CropBorder(value.parse()?),
                    "confidence" => ConfigEdit::Confidence(value.parse()?),
                    other => bail!("Unknown setting '{}'", other),
                };
                Ok(ConsoleCommand::Edit(target, edit))
            }
            [] => bail!("Empty command"),
            _ => bail!("Unrecognized command: {}", line.trim()),
        }
    }
}

/// One read from the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// Input stream ended; the display keeps running until `quit` or Ctrl-C
    Closed,
    Blank,
    Command(ConsoleCommand),
    Invalid(String),
}

impl ConsoleInput {
    /// Classify a line read from stdin, `None` meaning end of input
    pub fn read(line: Option<&str>) -> Self {
        match line {
            None => ConsoleInput::Closed,
            Some(line) if line.trim().is_empty() => ConsoleInput::Blank,
            Some(line) => match ConsoleCommand::parse(line) {
                Ok(command) => ConsoleInput::Command(command),
                Err(e) => ConsoleInput::Invalid(e.to_string()),
            },
        }
    }
}

pub const HELP: &str = "\
commands:
  <left|right|both> blur <on|off>
  <left|right|both> stroke <5-50>
  <left|right|both> width <20-100>
  <left|right|both> crop <0-50>
  <left|right|both> confidence <0.0-1.0>
  <left|right> device <index>
  devices | show | quit";

/// One-line description of a camera report
pub fn describe_report(camera: &str, report: &CameraReport) -> String {
    let digit = report
        .outcome
        .classification
        .map(|c| format!("{} ({:.2})", c.digit, c.confidence))
        .unwrap_or_else(|| "-".to_string());

    let overlay = match &report.outcome.quad {
        Some(q) => format!(
            "card [({:.2},{:.2}) ({:.2},{:.2}) ({:.2},{:.2}) ({:.2},{:.2})]",
            q.top_left.x, q.top_left.y,
            q.top_right.x, q.top_right.y,
            q.bottom_right.x, q.bottom_right.y,
            q.bottom_left.x, q.bottom_left.y,
        ),
        None => "no card".to_string(),
    };

    let thumbnail = match &report.outcome.thumbnail {
        Some(t) => format!("{}x{}", t.width(), t.height()),
        None => "-".to_string(),
    };

    format!("{:<5} frame {:>5}  digit {}  {}  thumb {}", camera, report.frame, digit, overlay, thumbnail)
}

pub fn describe_sum(sum: &DigitSum) -> String {
    let show = |d: Option<crate::models::Digit>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
    format!("Sum: {} ({} + {})", sum.total(), show(sum.left), show(sum.right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Digit;

    #[test]
    fn test_parse_edits() {
        assert_eq!(
            ConsoleCommand::parse("left stroke 20").unwrap(),
            ConsoleCommand::Edit(Target::Left, ConfigEdit::StrokeWidth(20))
        );
        assert_eq!(
            ConsoleCommand::parse("  both   blur off ").unwrap(),
            ConsoleCommand::Edit(Target::Both, ConfigEdit::Blur(false))
        );
        assert_eq!(
            ConsoleCommand::parse("right confidence 0.6").unwrap(),
            ConsoleCommand::Edit(Target::Right, ConfigEdit::Confidence(0.6))
        );
    }

    #[test]
    fn test_parse_device_and_misc() {
        assert_eq!(ConsoleCommand::parse("r device 1").unwrap(), ConsoleCommand::SelectDevice(Target::Right, 1));
        assert!(ConsoleCommand::parse("both device 1").is_err());
        assert_eq!(ConsoleCommand::parse("quit").unwrap(), ConsoleCommand::Quit);
        assert_eq!(ConsoleCommand::parse("devices").unwrap(), ConsoleCommand::ListDevices);
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("middle stroke 5").is_err());
        assert!(ConsoleCommand::parse("left stroke wide").is_err());
        assert!(ConsoleCommand::parse("left zoom 2").is_err());
        assert!(ConsoleCommand::parse("left blur maybe").is_err());
    }

    #[test]
    fn test_end_of_input_is_not_quit() {
        assert_eq!(ConsoleInput::read(None), ConsoleInput::Closed);
        assert_eq!(ConsoleInput::read(Some("   ")), ConsoleInput::Blank);
        assert_eq!(ConsoleInput::read(Some("quit")), ConsoleInput::Command(ConsoleCommand::Quit));
        assert!(matches!(ConsoleInput::read(Some("left zoom 2")), ConsoleInput::Invalid(_)));
    }

    #[test]
    fn test_edit_respects_validation() {
        let mut config = PipelineConfig::default();
        assert!(ConfigEdit::CropBorder(25).apply(&mut config).is_err());
        assert!(ConfigEdit::CropBorder(10).apply(&mut config).is_ok());
        assert_eq!(config.crop_border, 10);
    }

    #[test]
    fn test_describe_sum() {
        let sum = DigitSum { left: Some(Digit::try_from(3u8).unwrap()), right: None };
        assert_eq!(describe_sum(&sum), "Sum: 3 (3 + -)");
    }
}
