//! Per-item card composition: thumbnail, darkening band, text overlays and rounded corners.

use std::sync::Arc;

use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use image::{Rgba, RgbImage, RgbaImage};
use log::warn;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::config::CardConfig;
use crate::error::RenderResult;
use crate::image_pipeline::resize_exact;
use crate::item::ItemRecord;
use crate::text_render::TextPainter;

const CARD_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const OVERLAY_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TITLE_TEXT: Rgba<u8> = Rgba([0, 0, 0, 255]);
const MUTED_TEXT: Rgba<u8> = Rgba([0x66, 0x66, 0x66, 255]);

const TITLE_LINE_CHARS: usize = 18;
const TITLE_MAX_CHARS: usize = 36;
const TITLE_LINE_GAP_PX: f32 = 4.0;

/// Card geometry shared by every card in a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardLayout {
    pub width: u32,
    pub height: u32,
    pub thumb_height: u32,
    pub corner_radius: u32,
    pub gradient_height: u32,
    pub gradient_max_alpha: u8,
    pub font_px: f32,
}

impl From<&CardConfig> for CardLayout {
    fn from(config: &CardConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            thumb_height: config.thumb_height,
            corner_radius: config.corner_radius,
            gradient_height: config.gradient_height,
            gradient_max_alpha: config.gradient_max_alpha,
            font_px: config.font_px,
        }
    }
}

impl Default for CardLayout {
    fn default() -> Self {
        Self::from(&CardConfig::default())
    }
}

/// Formats a play count the way the service displays it (`2.5万`, `1.5千`, `999`).
pub fn format_count(count: u64) -> String {
    if count >= 10_000 {
        format!("{:.1}万", count as f64 / 10_000.0)
    } else if count >= 1_000 {
        let thousands = format!("{:.1}", count as f64 / 1_000.0);
        // 9950..=9999 would round up to "10.0千"; show those as plain integers.
        if thousands.starts_with("10") {
            count.to_string()
        } else {
            format!("{thousands}千")
        }
    } else {
        count.to_string()
    }
}

/// Gives scheme-less thumbnail URLs an `https` scheme.
pub fn normalize_thumbnail_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http") {
        trimmed.to_string()
    } else if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        format!("https://{trimmed}")
    }
}

fn collect_text(node: &Handle, text: &mut String) {
    if let NodeData::Text { contents } = &node.data {
        text.push_str(&contents.borrow());
    }
    for child in node.children.borrow().iter() {
        collect_text(child, text);
    }
}

/// Extracts plain text from a markup-bearing title, decoding character references.
pub fn strip_markup(raw: &str) -> String {
    let dom = parse_document(RcDom::default(), ParseOpts::default()).one(raw);
    let mut text = String::new();
    collect_text(&dom.document, &mut text);
    text
}

/// Hard-wraps a title into two lines, ellipsizing past the second line.
pub fn wrap_title(title: &str) -> [String; 2] {
    let chars: Vec<char> = title.chars().collect();
    let first: String = chars.iter().take(TITLE_LINE_CHARS).collect();
    let second: String = if chars.len() > TITLE_MAX_CHARS {
        let mut line: String = chars[TITLE_LINE_CHARS..TITLE_MAX_CHARS].iter().collect();
        line.push_str("...");
        line
    } else {
        chars.iter().skip(TITLE_LINE_CHARS).collect()
    };
    [first, second]
}

/// Darkens the last `band_height` rows above `bottom` toward black, alpha 0 → `max_alpha`.
fn apply_bottom_gradient(card: &mut RgbaImage, bottom: u32, band_height: u32, max_alpha: u8) {
    let bottom = bottom.min(card.height());
    let band_height = band_height.min(bottom);
    if band_height == 0 {
        return;
    }
    let top = bottom - band_height;
    for step in 0..band_height {
        let alpha = (u32::from(max_alpha) * step / band_height).min(255);
        let keep = 255 - alpha;
        let y = top + step;
        for x in 0..card.width() {
            let pixel = card.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut().take(3) {
                *channel = ((u32::from(*channel) * keep + 127) / 255) as u8;
            }
        }
    }
}

fn corner_coverage(x: u32, y: u32, width: u32, height: u32, radius: u32) -> f32 {
    let r = radius as f32;
    let px = x as f32 + 0.5;
    let py = y as f32 + 0.5;
    let cx = if x < radius {
        r
    } else if x >= width.saturating_sub(radius) {
        width as f32 - r
    } else {
        return 1.0;
    };
    let cy = if y < radius {
        r
    } else if y >= height.saturating_sub(radius) {
        height as f32 - r
    } else {
        return 1.0;
    };
    let distance = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
    (r - distance + 0.5).clamp(0.0, 1.0)
}

/// Makes the four corners transparent along a circular arc of `radius`.
fn apply_rounded_mask(card: &mut RgbaImage, radius: u32) {
    let (width, height) = card.dimensions();
    let radius = radius.min(width / 2).min(height / 2);
    if radius == 0 {
        return;
    }
    for (x, y, pixel) in card.enumerate_pixels_mut() {
        let coverage = corner_coverage(x, y, width, height, radius);
        if coverage < 1.0 {
            pixel.0[3] = (f32::from(pixel.0[3]) * coverage).round() as u8;
        }
    }
}

fn paste_opaque(card: &mut RgbaImage, source: &RgbImage) {
    for (x, y, pixel) in source.enumerate_pixels() {
        if x < card.width() && y < card.height() {
            card.put_pixel(x, y, Rgba([pixel.0[0], pixel.0[1], pixel.0[2], 255]));
        }
    }
}

pub struct CardRenderer {
    layout: CardLayout,
    painter: Arc<dyn TextPainter>,
}

impl CardRenderer {
    pub fn new(layout: CardLayout, painter: Arc<dyn TextPainter>) -> Self {
        Self { layout, painter }
    }

    pub fn layout(&self) -> &CardLayout {
        &self.layout
    }

    /// Solid card used wherever composition fails.
    pub fn blank_card(&self) -> RgbaImage {
        RgbaImage::from_pixel(self.layout.width, self.layout.height, CARD_BACKGROUND)
    }

    /// Renders one card; any failure yields a blank card of the same size.
    ///
    /// `index` is the 1-based ordinal printed in the corner.
    pub fn compose(
        &self,
        item: &ItemRecord,
        index: usize,
        thumbnail: RenderResult<RgbImage>,
    ) -> RgbaImage {
        match self.try_compose(item, index, thumbnail) {
            Ok(card) => card,
            Err(error) => {
                warn!(
                    "card {index} rendered blank url={} error={error}",
                    item.thumbnail_url
                );
                self.blank_card()
            }
        }
    }

    fn try_compose(
        &self,
        item: &ItemRecord,
        index: usize,
        thumbnail: RenderResult<RgbImage>,
    ) -> RenderResult<RgbaImage> {
        let thumbnail = thumbnail?;
        let layout = &self.layout;
        let mut card = self.blank_card();

        let resized = resize_exact(&thumbnail, layout.width, layout.thumb_height);
        paste_opaque(&mut card, &resized);
        apply_bottom_gradient(
            &mut card,
            layout.thumb_height,
            layout.gradient_height,
            layout.gradient_max_alpha,
        );

        let width = layout.width as i32;
        let height = layout.height as i32;
        let thumb_height = layout.thumb_height as i32;
        let px = layout.font_px;

        self.painter.draw(
            &mut card,
            &format_count(item.play_count),
            8,
            thumb_height - 20,
            px,
            OVERLAY_TEXT,
        );
        self.painter.draw(
            &mut card,
            &item.duration,
            width - 40,
            thumb_height - 20,
            px,
            OVERLAY_TEXT,
        );

        let title_top = thumb_height + 8;
        let line_advance = (px + TITLE_LINE_GAP_PX).round() as i32;
        for (line_index, line) in wrap_title(&strip_markup(&item.title)).iter().enumerate() {
            self.painter.draw(
                &mut card,
                line,
                8,
                title_top + line_index as i32 * line_advance,
                px,
                TITLE_TEXT,
            );
        }

        self.painter.draw(
            &mut card,
            &format!("UP {}", item.author),
            8,
            thumb_height + 60,
            px,
            MUTED_TEXT,
        );
        self.painter.draw(
            &mut card,
            &index.to_string(),
            width - 30,
            height - 20,
            px,
            MUTED_TEXT,
        );

        apply_rounded_mask(&mut card, layout.corner_radius);
        Ok(card)
    }
}
