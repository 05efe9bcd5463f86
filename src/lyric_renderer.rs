//! Renders time-stamped lyrics as centered lines over a vertical gradient.

use std::sync::{Arc, OnceLock};

use image::{Rgb, Rgba, RgbaImage};
use regex::Regex;

use crate::config::LyricConfig;
use crate::error::RenderResult;
use crate::image_pipeline::{encode_jpeg_default, rgba_to_rgb};
use crate::text_render::TextPainter;

/// Full-width space drawn for blank lines so they keep a line's height.
const BLANK_LINE_PLACEHOLDER: &str = "\u{3000}";
/// Combined top and bottom padding.
const VERTICAL_PADDING: u32 = 100;
const TOP_PADDING: u32 = VERTICAL_PADDING / 2;

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\d{2}:\d{2}(?:\.\d{2,3})?\]").expect("timestamp pattern is valid")
    })
}

/// Removes every `[MM:SS]` / `[MM:SS.ff]` / `[MM:SS.fff]` marker from `line`.
pub fn strip_timestamps(line: &str) -> String {
    timestamp_pattern().replace_all(line, "").into_owned()
}

/// Splits on `\n`, `\r\n` and lone `\r`; a trailing terminator does not add a line.
fn split_lines(raw: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = raw;
    while let Some(end) = rest.find(['\n', '\r']) {
        lines.push(&rest[..end]);
        let skip = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[end + skip..];
    }
    if !rest.is_empty() {
        lines.push(rest);
    }
    lines
}

/// Lyric lines with timestamp markers removed; blank lines are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricDocument {
    lines: Vec<String>,
}

impl LyricDocument {
    pub fn parse(raw: &str) -> Self {
        let lines = split_lines(raw).into_iter().map(strip_timestamps).collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines as drawn: blank entries become the placeholder, and an empty
    /// document renders as a single blank line.
    fn display_lines(&self) -> Vec<&str> {
        if self.lines.is_empty() {
            return vec![BLANK_LINE_PLACEHOLDER];
        }
        self.lines
            .iter()
            .map(|line| {
                if line.trim().is_empty() {
                    BLANK_LINE_PLACEHOLDER
                } else {
                    line.as_str()
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LyricStyle {
    pub width: u32,
    pub font_px: f32,
    pub line_spacing: u32,
    pub top_color: Rgb<u8>,
    pub bottom_color: Rgb<u8>,
    pub text_color: Rgb<u8>,
}

impl From<&LyricConfig> for LyricStyle {
    fn from(config: &LyricConfig) -> Self {
        Self {
            width: config.width.max(1),
            font_px: config.font_px,
            line_spacing: config.line_spacing,
            top_color: Rgb(config.top_color),
            bottom_color: Rgb(config.bottom_color),
            text_color: Rgb(config.text_color),
        }
    }
}

impl Default for LyricStyle {
    fn default() -> Self {
        Self::from(&LyricConfig::default())
    }
}

fn lerp_channel(top: u8, bottom: u8, ratio: f32) -> u8 {
    (f32::from(top) * (1.0 - ratio) + f32::from(bottom) * ratio) as u8
}

fn vertical_gradient(width: u32, height: u32, top: Rgb<u8>, bottom: Rgb<u8>) -> RgbaImage {
    let mut image = RgbaImage::new(width, height);
    for y in 0..height {
        let ratio = y as f32 / height as f32;
        let color = Rgba([
            lerp_channel(top.0[0], bottom.0[0], ratio),
            lerp_channel(top.0[1], bottom.0[1], ratio),
            lerp_channel(top.0[2], bottom.0[2], ratio),
            255,
        ]);
        for x in 0..width {
            image.put_pixel(x, y, color);
        }
    }
    image
}

pub struct LyricRenderer {
    painter: Arc<dyn TextPainter>,
    style: LyricStyle,
}

impl LyricRenderer {
    pub fn new(painter: Arc<dyn TextPainter>, style: LyricStyle) -> Self {
        Self { painter, style }
    }

    /// Strips timestamps from `text` and renders it to JPEG bytes.
    pub fn render(&self, text: &str) -> RenderResult<Vec<u8>> {
        let image = self.render_image(&LyricDocument::parse(text));
        encode_jpeg_default(&rgba_to_rgb(&image))
    }

    pub fn render_image(&self, document: &LyricDocument) -> RgbaImage {
        let style = &self.style;
        let lines = document.display_lines();
        let line_heights: Vec<u32> = lines
            .iter()
            .map(|line| self.painter.measure(line, style.font_px).1)
            .collect();
        let total_height = line_heights.iter().sum::<u32>()
            + style.line_spacing * (lines.len() as u32).saturating_sub(1)
            + VERTICAL_PADDING;

        let mut image = vertical_gradient(
            style.width,
            total_height,
            style.top_color,
            style.bottom_color,
        );
        let text_color = Rgba([
            style.text_color.0[0],
            style.text_color.0[1],
            style.text_color.0[2],
            255,
        ]);

        let mut y = TOP_PADDING as i32;
        for (line, line_height) in lines.iter().zip(&line_heights) {
            let (text_width, _) = self.painter.measure(line, style.font_px);
            let x = (style.width as i32 - text_width as i32) / 2;
            self.painter
                .draw(&mut image, line, x, y, style.font_px, text_color);
            y += (*line_height + style.line_spacing) as i32;
        }
        image
    }
}
