use crate::error::MapError;
use crate::types::Viewport;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub style: StyleConfig,
    pub plot: Option<PlotSpec>,
    pub batch: Option<BatchConfig>,
    pub interactive: Option<InteractiveConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputConfig {
    /// Directory that relative input and output paths are resolved against.
    pub root: Option<PathBuf>,
}

impl InputConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleConfig {
    /// Figure width in inches; pixel width is `width_in * dpi`.
    pub width_in: f32,
    /// Figure height in inches. The map panel is fitted inside it.
    pub height_in: f32,
    pub dpi: f32,
    /// Vertical stretch applied to the map panel.
    pub aspect: f64,
    /// Ring outline colour as `#rrggbb`; no outlines when unset.
    pub outline: Option<String>,
    /// TrueType font for the title and legend labels; the bundled
    /// DejaVu Sans Mono when unset.
    pub font: Option<PathBuf>,
    /// Output format; inferred from the output extension when unset.
    pub format: Option<String>,
    /// Saved resolution; defaults to `dpi`.
    pub save_dpi: Option<f32>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            width_in: 6.4,
            height_in: 4.8,
            dpi: 100.0,
            aspect: 1.35,
            outline: None,
            font: None,
            format: None,
            save_dpi: None,
        }
    }
}

/// Everything one map needs. Also the row layout of the batch metadata file,
/// so field order matters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PlotSpec {
    pub shapefile: PathBuf,
    pub dataset: PathBuf,
    pub data_id: String,
    pub data_column: String,
    pub shape_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub output: PathBuf,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl PlotSpec {
    pub fn viewport(&self) -> Result<Viewport, MapError> {
        Viewport::new(self.west, self.south, self.east, self.north)
    }

    pub fn resolved(&self, input: &InputConfig) -> PlotSpec {
        PlotSpec {
            shapefile: input.resolve(&self.shapefile),
            dataset: input.resolve(&self.dataset),
            output: input.resolve(&self.output),
            ..self.clone()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    pub metadata: PathBuf,
    /// Whether the first metadata row is a header.
    #[serde(default = "default_true")]
    pub skip_header: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InteractiveConfig {
    pub geojson: PathBuf,
    pub dataset: PathBuf,
    pub data_id: String,
    pub data_column: String,
    /// Feature property the dataset ids are matched against.
    pub key_on: String,
    #[serde(default = "default_center")]
    pub center: [f64; 2],
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    #[serde(default)]
    pub legend: String,
    #[serde(default = "default_tiles")]
    pub tiles: String,
    pub output: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_center() -> [f64; 2] {
    [49.249172, -123.024681]
}

fn default_zoom() -> u8 {
    11
}

fn default_tiles() -> String {
    "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string()
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
