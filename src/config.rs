//! Reader settings, read from YAML and overridable from the command line.

use crate::chapter::DEFAULT_HEADING_THRESHOLD;
use crate::error::{FolioError, Result};
use crate::paginate::PageLayout;
use crate::paginate::measure::Typography;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "FOLIO_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub column_width: f32,
    pub max_column_height: f32,
    pub font_size: f32,
    /// Multiple of `font_size`.
    pub line_height: f32,
    /// Fraction of `font_size`.
    pub average_char_width: f32,
    pub image_placeholder_height: f32,
    pub block_spacing: f32,
    pub heading_threshold: f64,
    pub image_wait_ms: u64,
    pub split_oversize_containers: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        let typography = Typography::default();
        let layout = PageLayout::default();
        Self {
            column_width: layout.column_width,
            max_column_height: layout.max_column_height,
            font_size: typography.font_size,
            line_height: typography.line_height,
            average_char_width: typography.average_char_width,
            image_placeholder_height: typography.image_placeholder_height,
            block_spacing: typography.block_spacing,
            heading_threshold: DEFAULT_HEADING_THRESHOLD,
            image_wait_ms: layout.image_wait.as_millis() as u64,
            split_oversize_containers: layout.split_oversize_containers,
        }
    }
}

impl ReaderConfig {
    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml_ng::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Load from `path` if given, else from `$FOLIO_CONFIG` if set, else use
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) if !p.is_empty() => Self::from_file(Path::new(&p)),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply command-line overrides on top of file values.
    pub fn with_overrides(mut self, width: Option<f32>, height: Option<f32>) -> Result<Self> {
        if let Some(w) = width {
            self.column_width = w;
        }
        if let Some(h) = height {
            self.max_column_height = h;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("column_width", self.column_width),
            ("max_column_height", self.max_column_height),
            ("font_size", self.font_size),
            ("line_height", self.line_height),
            ("average_char_width", self.average_char_width),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(FolioError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.block_spacing < 0.0 || self.image_placeholder_height < 0.0 {
            return Err(FolioError::Config(
                "block_spacing and image_placeholder_height cannot be negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.heading_threshold) {
            return Err(FolioError::Config(format!(
                "heading_threshold must be within 0..=1, got {}",
                self.heading_threshold
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout {
            column_width: self.column_width,
            max_column_height: self.max_column_height,
            image_wait: Duration::from_millis(self.image_wait_ms),
            split_oversize_containers: self.split_oversize_containers,
        }
    }

    pub fn typography(&self) -> Typography {
        Typography {
            font_size: self.font_size,
            line_height: self.line_height,
            average_char_width: self.average_char_width,
            block_spacing: self.block_spacing,
            image_placeholder_height: self.image_placeholder_height,
        }
    }
}
