//! Glyph measurement and rasterization shared by the card and lyric renderers.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::error::{RenderError, RenderResult};

/// Measures and draws single-line text onto RGBA canvases.
pub trait TextPainter: Send + Sync {
    /// Returns `(width, height)` in pixels for `text` at `px`.
    fn measure(&self, text: &str, px: f32) -> (u32, u32);
    /// Draws `text` with its top-left corner at `(x, y)`; out-of-bounds glyph pixels are clipped.
    fn draw(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, px: f32, color: Rgba<u8>);
}

/// Painter backed by a TrueType/OpenType font file.
#[derive(Clone)]
pub struct FontPainter {
    font: FontArc,
}

impl FontPainter {
    pub fn from_bytes(bytes: Vec<u8>) -> RenderResult<Self> {
        let font = FontArc::try_from_vec(bytes)
            .map_err(|error| RenderError::Font(error.to_string()))?;
        Ok(Self { font })
    }

    pub fn from_path(path: &Path) -> RenderResult<Self> {
        let bytes = std::fs::read(path).map_err(|error| {
            RenderError::Font(format!("cannot read {}: {error}", path.display()))
        })?;
        Self::from_bytes(bytes)
    }
}

impl TextPainter for FontPainter {
    fn measure(&self, text: &str, px: f32) -> (u32, u32) {
        text_size(PxScale::from(px), &self.font, text)
    }

    fn draw(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, px: f32, color: Rgba<u8>) {
        if text.is_empty() {
            return;
        }
        draw_text_mut(canvas, color, x, y, PxScale::from(px), &self.font, text);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{Rgba, RgbaImage};

    use super::TextPainter;

    /// Draws each non-space character as a solid block half as wide as it is tall.
    pub struct BlockPainter;

    impl BlockPainter {
        fn advance(px: f32) -> u32 {
            ((px / 2.0).round() as u32).max(1)
        }
    }

    impl TextPainter for BlockPainter {
        fn measure(&self, text: &str, px: f32) -> (u32, u32) {
            let count = text.chars().count() as u32;
            (count * Self::advance(px), px.round() as u32)
        }

        fn draw(
            &self,
            canvas: &mut RgbaImage,
            text: &str,
            x: i32,
            y: i32,
            px: f32,
            color: Rgba<u8>,
        ) {
            let advance = Self::advance(px) as i32;
            let height = px.round() as i32;
            for (slot, ch) in text.chars().enumerate() {
                if ch.is_whitespace() {
                    continue;
                }
                let left = x + slot as i32 * advance;
                for dy in 0..height {
                    for dx in 0..advance.saturating_sub(1) {
                        let (px_x, px_y) = (left + dx, y + dy);
                        if px_x < 0 || px_y < 0 {
                            continue;
                        }
                        let (px_x, px_y) = (px_x as u32, px_y as u32);
                        if px_x < canvas.width() && px_y < canvas.height() {
                            canvas.put_pixel(px_x, px_y, color);
                        }
                    }
                }
            }
        }
    }

    /// Block painter that ignores the requested color and paints each block
    /// with the character's low byte in the red channel, so tests can read
    /// back which text landed where.
    pub struct CharCodePainter;

    impl TextPainter for CharCodePainter {
        fn measure(&self, text: &str, px: f32) -> (u32, u32) {
            BlockPainter.measure(text, px)
        }

        fn draw(
            &self,
            canvas: &mut RgbaImage,
            text: &str,
            x: i32,
            y: i32,
            px: f32,
            _color: Rgba<u8>,
        ) {
            let advance = BlockPainter::advance(px) as i32;
            for (slot, ch) in text.chars().enumerate() {
                let code = Rgba([(u32::from(ch) & 0xff) as u8, 0, 0, 255]);
                let mut glyph = [0u8; 4];
                BlockPainter.draw(
                    canvas,
                    ch.encode_utf8(&mut glyph),
                    x + slot as i32 * advance,
                    y,
                    px,
                    code,
                );
            }
        }
    }
}
