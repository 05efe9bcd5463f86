//! Persistent renderer configuration model and defaults.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::{RenderError, RenderResult};

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Card geometry and overlay tuning.
    pub card: CardConfig,
    #[serde(default)]
    /// Thumbnail download and cache behavior.
    pub fetch: FetchConfig,
    #[serde(default)]
    /// Grid assembly defaults.
    pub grid: GridConfig,
    #[serde(default)]
    /// Lyric image styling.
    pub lyrics: LyricConfig,
    #[serde(default)]
    /// Font resource shared by both renderers.
    pub text: TextConfig,
}

/// Card geometry. All cards in a batch share these dimensions.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CardConfig {
    #[serde(default = "default_card_width")]
    pub width: u32,
    #[serde(default = "default_card_height")]
    pub height: u32,
    #[serde(default = "default_thumb_height")]
    pub thumb_height: u32,
    #[serde(default = "default_margin")]
    pub margin: u32,
    #[serde(default = "default_corner_radius")]
    pub corner_radius: u32,
    /// Height of the darkening band at the bottom of the thumbnail.
    #[serde(default = "default_gradient_height")]
    pub gradient_height: u32,
    /// Alpha reached by the darkening band at its last row.
    #[serde(default = "default_gradient_max_alpha")]
    pub gradient_max_alpha: u8,
    #[serde(default = "default_card_font_px")]
    pub font_px: f32,
}

/// Network and disk-cache preferences for thumbnail fetching.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchConfig {
    /// Cache root; empty means the platform cache directory.
    #[serde(default)]
    pub cache_dir: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    /// Upper bound for one whole batch; unfinished cards render blank.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct GridConfig {
    #[serde(default = "default_cards_per_row")]
    pub cards_per_row: usize,
    #[serde(default = "default_quality")]
    pub quality: u8,
}

/// Lyric image styling.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LyricConfig {
    #[serde(default = "default_lyric_width")]
    pub width: u32,
    #[serde(default = "default_lyric_font_px")]
    pub font_px: f32,
    #[serde(default = "default_line_spacing")]
    pub line_spacing: u32,
    #[serde(default = "default_top_color")]
    pub top_color: [u8; 3],
    #[serde(default = "default_bottom_color")]
    pub bottom_color: [u8; 3],
    #[serde(default = "default_text_color")]
    pub text_color: [u8; 3],
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TextConfig {
    /// TTF/OTF file that covers the rendered script (CJK titles are common).
    #[serde(default)]
    pub font_path: String,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            width: default_card_width(),
            height: default_card_height(),
            thumb_height: default_thumb_height(),
            margin: default_margin(),
            corner_radius: default_corner_radius(),
            gradient_height: default_gradient_height(),
            gradient_max_alpha: default_gradient_max_alpha(),
            font_px: default_card_font_px(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: String::new(),
            max_concurrency: default_max_concurrency(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cards_per_row: default_cards_per_row(),
            quality: default_quality(),
        }
    }
}

impl Default for LyricConfig {
    fn default() -> Self {
        Self {
            width: default_lyric_width(),
            font_px: default_lyric_font_px(),
            line_spacing: default_line_spacing(),
            top_color: default_top_color(),
            bottom_color: default_bottom_color(),
            text_color: default_text_color(),
        }
    }
}

fn default_card_width() -> u32 {
    300
}

fn default_card_height() -> u32 {
    250
}

fn default_thumb_height() -> u32 {
    168
}

fn default_margin() -> u32 {
    16
}

fn default_corner_radius() -> u32 {
    10
}

fn default_gradient_height() -> u32 {
    40
}

fn default_gradient_max_alpha() -> u8 {
    180
}

fn default_card_font_px() -> f32 {
    16.0
}

fn default_max_concurrency() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_max_body_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_batch_timeout_secs() -> u64 {
    60
}

fn default_cards_per_row() -> usize {
    3
}

fn default_quality() -> u8 {
    70
}

fn default_lyric_width() -> u32 {
    1000
}

fn default_lyric_font_px() -> f32 {
    30.0
}

fn default_line_spacing() -> u32 {
    20
}

fn default_top_color() -> [u8; 3] {
    [255, 250, 240]
}

fn default_bottom_color() -> [u8; 3] {
    [235, 255, 247]
}

fn default_text_color() -> [u8; 3] {
    [70, 70, 70]
}

impl Config {
    /// Returns a copy with values clamped into ranges the renderers can use.
    pub fn sanitized(&self) -> Self {
        let mut next = self.clone();
        next.card.width = next.card.width.max(1);
        next.card.height = next.card.height.max(1);
        next.card.thumb_height = next.card.thumb_height.clamp(1, next.card.height);
        next.card.gradient_height = next.card.gradient_height.min(next.card.thumb_height);
        next.card.corner_radius = next
            .card
            .corner_radius
            .min(next.card.width.min(next.card.height) / 2);
        if !next.card.font_px.is_finite() || next.card.font_px <= 0.0 {
            next.card.font_px = default_card_font_px();
        }
        next.fetch.max_concurrency = next.fetch.max_concurrency.max(1);
        next.fetch.batch_timeout_secs = next.fetch.batch_timeout_secs.max(1);
        next.grid.cards_per_row = next.grid.cards_per_row.max(1);
        next.grid.quality = next.grid.quality.clamp(1, 100);
        next.lyrics.width = next.lyrics.width.max(1);
        if !next.lyrics.font_px.is_finite() || next.lyrics.font_px <= 0.0 {
            next.lyrics.font_px = default_lyric_font_px();
        }
        next
    }

    /// Effective cache root for downloaded thumbnails.
    pub fn cache_root(&self) -> PathBuf {
        if !self.fetch.cache_dir.trim().is_empty() {
            return PathBuf::from(self.fetch.cache_dir.trim());
        }
        dirs::cache_dir()
            .map(|path| path.join("cardgrid").join("images"))
            .unwrap_or_else(|| PathBuf::from("image_cache"))
    }
}

/// Default location of `config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("cardgrid").join("config.toml"))
}

/// Loads the config at `path`, writing defaults first when the file is missing.
pub fn load_or_create(path: &Path) -> RenderResult<Config> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string(&Config::default())
            .map_err(|error| RenderError::Config(error.to_string()))?;
        std::fs::write(path, serialized)?;
    }
    let content = std::fs::read_to_string(path)?;
    let config: Config =
        toml::from_str(&content).map_err(|error| RenderError::Config(error.to_string()))?;
    Ok(config.sanitized())
}
