use crate::centroids::CentroidTable;
use crate::types::Category;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub markers: MarkerConfig,
    #[serde(default)]
    pub centroids: CentroidTable,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

/// Where each dataset lives. `http(s)://` locations are fetched, anything else is a local path.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub boundaries: String,
    pub income: String,
    pub infantil: String,
    pub primaria: String,
    pub secundaria: String,
}

impl SourceConfig {
    pub fn category(&self, category: Category) -> &str {
        match category {
            Category::Infantil => &self.infantil,
            Category::Primaria => &self.primaria,
            Category::Secundaria => &self.secundaria,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ColorStop {
    pub value: f64,
    pub color: String, // Hex code
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OverlayConfig {
    pub fill_opacity: f64,
    pub initial_fill: String,
    pub line_color: String,
    pub line_width: f64,
    pub stops: Vec<ColorStop>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        let stops = [
            (35000.0, "#f28cb1"),
            (45000.0, "#3bb2d0"),
            (55000.0, "#2a9d8f"),
            (65000.0, "#e9c46a"),
            (80000.0, "#e76f51"),
        ]
        .into_iter()
        .map(|(value, color)| ColorStop {
            value,
            color: color.to_string(),
        })
        .collect();

        Self {
            fill_opacity: 0.6,
            initial_fill: "#ccc".to_string(),
            line_color: "#000".to_string(),
            line_width: 2.0,
            stops,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarkerConfig {
    pub popup_offset: u32,
    pub colors: CategoryColors,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            popup_offset: 25,
            colors: CategoryColors::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CategoryColors {
    pub infantil: String,
    pub primaria: String,
    pub secundaria: String,
}

impl CategoryColors {
    pub fn get(&self, category: Category) -> &str {
        match category {
            Category::Infantil => &self.infantil,
            Category::Primaria => &self.primaria,
            Category::Secundaria => &self.secundaria,
        }
    }
}

impl Default for CategoryColors {
    fn default() -> Self {
        Self {
            infantil: "blue".to_string(),
            primaria: "green".to_string(),
            secundaria: "orange".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub center: [f64; 2],
    pub zoom: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: [2.1734, 41.3851],
            zoom: 12.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("web")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let stops = &self.overlay.stops;
        if stops.len() < 2 {
            bail!("overlay.stops needs at least two entries, got {}", stops.len());
        }
        for pair in stops.windows(2) {
            if pair[0].value >= pair[1].value {
                bail!(
                    "overlay.stops must be strictly ascending ({} is followed by {})",
                    pair[0].value,
                    pair[1].value
                );
            }
        }
        for stop in stops {
            parse_hex_color(&stop.color)
                .with_context(|| format!("Invalid colour for stop {}", stop.value))?;
        }
        if !(0.0..=1.0).contains(&self.overlay.fill_opacity) {
            bail!("overlay.fill_opacity must be within 0..=1");
        }
        Ok(())
    }
}

/// Parses `#rgb` or `#rrggbb`.
pub fn parse_hex_color(hex: &str) -> Result<[u8; 3]> {
    let digits = hex
        .strip_prefix('#')
        .with_context(|| format!("Colour {:?} does not start with '#'", hex))?;

    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        _ => bail!("Colour {:?} must have 3 or 6 hex digits", hex),
    };

    let channel = |i: usize| {
        expanded
            .get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .with_context(|| format!("Colour {:?} is not valid hex", hex))
    };

    Ok([channel(0)?, channel(2)?, channel(4)?])
}
