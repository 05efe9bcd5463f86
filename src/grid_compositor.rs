//! Concurrent batch rendering and grid assembly.
//!
//! One task per item fetches its thumbnail and composes its card. Results are
//! slotted back by input position, so grid order never depends on completion order.

use std::sync::Arc;
use std::time::Duration;

use image::{imageops, Rgba, RgbaImage};
use log::{info, warn};
use tokio::task::JoinSet;

use crate::card_renderer::{normalize_thumbnail_url, CardLayout, CardRenderer};
use crate::config::GridConfig;
use crate::error::{RenderError, RenderResult};
use crate::fetcher::{BoundedFetcher, HttpSource};
use crate::image_pipeline::{encode_jpeg, rgba_to_rgb};
use crate::item::ItemRecord;

const GRID_BACKGROUND: Rgba<u8> = Rgba([0xf5, 0xf5, 0xf5, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridOptions {
    pub cards_per_row: usize,
    /// JPEG quality, clamped to 1..=100 at encode time.
    pub quality: u8,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self::from(&GridConfig::default())
    }
}

impl From<&GridConfig> for GridOptions {
    fn from(config: &GridConfig) -> Self {
        Self {
            cards_per_row: config.cards_per_row,
            quality: config.quality,
        }
    }
}

/// Largest canvas the compositor will allocate, in pixels.
const MAX_CANVAS_PIXELS: u64 = 100_000_000;

fn layout_overflow(what: &str) -> RenderError {
    RenderError::InvalidLayout(format!("{what} overflows the canvas size limits"))
}

/// Width of every row: cards plus a margin on each side and between cards.
pub fn row_width(cards_per_row: usize, card_width: u32, margin: u32) -> RenderResult<u32> {
    let per_row = u32::try_from(cards_per_row).map_err(|_| layout_overflow("cards_per_row"))?;
    per_row
        .checked_mul(card_width)
        .zip(per_row.checked_add(1).and_then(|gaps| gaps.checked_mul(margin)))
        .and_then(|(cards, gaps)| cards.checked_add(gaps))
        .ok_or_else(|| layout_overflow("row width"))
}

pub fn row_height(card_height: u32, margin: u32) -> RenderResult<u32> {
    margin
        .checked_mul(2)
        .and_then(|margins| margins.checked_add(card_height))
        .ok_or_else(|| layout_overflow("row height"))
}

/// Final `(width, height)` of a grid holding `card_count` cards.
pub fn grid_size(
    card_count: usize,
    cards_per_row: usize,
    layout: &CardLayout,
    margin: u32,
) -> RenderResult<(u32, u32)> {
    if card_count == 0 {
        return Err(RenderError::EmptyInput);
    }
    if cards_per_row == 0 {
        return Err(RenderError::InvalidLayout(
            "cards_per_row must be at least 1".to_string(),
        ));
    }
    let width = row_width(cards_per_row, layout.width, margin)?;
    let rows = u32::try_from(card_count.div_ceil(cards_per_row))
        .map_err(|_| layout_overflow("row count"))?;
    let height = row_height(layout.height, margin)?
        .checked_mul(rows)
        .ok_or_else(|| layout_overflow("grid height"))?;
    if u64::from(width) * u64::from(height) > MAX_CANVAS_PIXELS {
        return Err(layout_overflow("grid"));
    }
    Ok((width, height))
}

/// Tiles cards into rows and stacks the rows into one RGBA canvas.
pub fn assemble_grid(
    cards: &[RgbaImage],
    cards_per_row: usize,
    layout: &CardLayout,
    margin: u32,
) -> RenderResult<RgbaImage> {
    let (width, total_height) = grid_size(cards.len(), cards_per_row, layout, margin)?;
    let height = row_height(layout.height, margin)?;
    let rows: Vec<RgbaImage> = cards
        .chunks(cards_per_row)
        .map(|row_cards| {
            let mut row = RgbaImage::from_pixel(width, height, GRID_BACKGROUND);
            for (column, card) in row_cards.iter().enumerate() {
                let x = i64::from(margin) + column as i64 * i64::from(layout.width + margin);
                imageops::overlay(&mut row, card, x, i64::from(margin));
            }
            row
        })
        .collect();

    let mut canvas = RgbaImage::from_pixel(width, total_height, GRID_BACKGROUND);
    let mut y_offset = 0i64;
    for row in &rows {
        imageops::overlay(&mut canvas, row, 0, y_offset);
        y_offset += i64::from(row.height());
    }
    Ok(canvas)
}

/// Composites the canvas over an opaque background and encodes it as JPEG.
pub fn flatten_to_jpeg(canvas: &RgbaImage, quality: u8) -> RenderResult<Vec<u8>> {
    let mut flattened = RgbaImage::from_pixel(canvas.width(), canvas.height(), GRID_BACKGROUND);
    imageops::overlay(&mut flattened, canvas, 0, 0);
    encode_jpeg(&rgba_to_rgb(&flattened), quality)
}

pub struct GridCompositor<S> {
    fetcher: Arc<BoundedFetcher<S>>,
    renderer: Arc<CardRenderer>,
    margin: u32,
    batch_timeout: Duration,
}

impl<S: HttpSource> GridCompositor<S> {
    pub fn new(
        fetcher: Arc<BoundedFetcher<S>>,
        renderer: Arc<CardRenderer>,
        margin: u32,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            margin,
            batch_timeout,
        }
    }

    /// Renders `items` into one JPEG grid.
    ///
    /// Per-card failures become blank cards; only empty input, bad layout, or
    /// final encoding failures are returned as errors.
    pub async fn render(
        &self,
        items: &[ItemRecord],
        options: GridOptions,
    ) -> RenderResult<Vec<u8>> {
        grid_size(
            items.len(),
            options.cards_per_row,
            self.renderer.layout(),
            self.margin,
        )?;

        let cards = self.render_cards(items).await;
        let canvas = assemble_grid(
            &cards,
            options.cards_per_row,
            self.renderer.layout(),
            self.margin,
        )?;
        flatten_to_jpeg(&canvas, options.quality)
    }

    /// Composes one card per item, in input order.
    pub async fn render_cards(&self, items: &[ItemRecord]) -> Vec<RgbaImage> {
        let mut tasks = JoinSet::new();
        for (position, item) in items.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let renderer = Arc::clone(&self.renderer);
            let item = item.clone();
            tasks.spawn(async move {
                let url = normalize_thumbnail_url(&item.thumbnail_url);
                let thumbnail = fetcher.fetch(&url).await;
                (position, renderer.compose(&item, position + 1, thumbnail))
            });
        }

        let mut slots: Vec<Option<RgbaImage>> = vec![None; items.len()];
        let deadline = tokio::time::Instant::now() + self.batch_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, tasks.join_next()).await;
            match next {
                Ok(Some(Ok((position, card)))) => slots[position] = Some(card),
                Ok(Some(Err(join_error))) => warn!("card task failed: {join_error}"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "batch timed out after {:?}; {} cards left unfinished",
                        self.batch_timeout,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        let unfinished = slots.iter().filter(|slot| slot.is_none()).count();
        info!(
            "rendered {} cards ({} unfinished)",
            items.len(),
            unfinished
        );
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| self.renderer.blank_card()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use image::GenericImageView;

    use super::*;
    use crate::fetcher::test_support::StubSource;
    use crate::image_cache::{unique_temp_dir, ImageCache};
    use crate::image_pipeline::encode_test_png;
    use crate::text_render::test_support::{BlockPainter, CharCodePainter};
    use crate::text_render::TextPainter;

    const MARGIN: u32 = 16;

    fn compositor(
        test_name: &str,
        source: StubSource,
        batch_timeout: Duration,
    ) -> GridCompositor<StubSource> {
        compositor_with_painter(test_name, source, batch_timeout, Arc::new(BlockPainter))
    }

    fn compositor_with_painter(
        test_name: &str,
        source: StubSource,
        batch_timeout: Duration,
        painter: Arc<dyn TextPainter>,
    ) -> GridCompositor<StubSource> {
        let cache = ImageCache::new(unique_temp_dir(test_name)).expect("cache should open");
        let fetcher = Arc::new(BoundedFetcher::with_capacity(source, cache, 4));
        let renderer = Arc::new(CardRenderer::new(CardLayout::default(), painter));
        GridCompositor::new(fetcher, renderer, MARGIN, batch_timeout)
    }

    fn items(count: usize) -> Vec<ItemRecord> {
        (0..count)
            .map(|index| ItemRecord {
                thumbnail_url: format!("//i0.example.test/{index}.jpg"),
                title: format!("track number {index}"),
                author: "someone".to_string(),
                play_count: 1_234,
                duration: "3:21".to_string(),
            })
            .collect()
    }

    fn cleanup(compositor: &GridCompositor<StubSource>) {
        let _ = std::fs::remove_dir_all(compositor.fetcher.cache().root());
    }

    #[test]
    fn test_assemble_grid_dimensions_for_partial_and_full_rows() {
        let layout = CardLayout::default();
        let blank = RgbaImage::from_pixel(layout.width, layout.height, Rgba([255, 255, 255, 255]));
        for count in 1..=7usize {
            let cards = vec![blank.clone(); count];
            let canvas = assemble_grid(&cards, 3, &layout, MARGIN).expect("grid should assemble");
            let rows = count.div_ceil(3) as u32;
            assert_eq!(canvas.width(), 3 * 300 + 4 * 16);
            assert_eq!(canvas.height(), rows * (250 + 2 * 16));
        }
    }

    #[test]
    fn test_assemble_grid_keeps_background_in_margins_and_corners() {
        let mut layout = CardLayout::default();
        layout.width = 20;
        layout.height = 10;
        let mut card = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 0, 255]));
        card.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let canvas = assemble_grid(&[card.clone(), card], 3, &layout, 2).expect("grid assembles");

        assert_eq!(canvas.dimensions(), (3 * 20 + 4 * 2, 14));
        assert_eq!(canvas.get_pixel(0, 0), &GRID_BACKGROUND);
        assert_eq!(canvas.get_pixel(2, 2), &GRID_BACKGROUND);
        assert_eq!(canvas.get_pixel(3, 3), &Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(24, 2), &GRID_BACKGROUND);
        assert_eq!(canvas.get_pixel(25, 3), &Rgba([0, 0, 0, 255]));
        // Third column has no card.
        assert_eq!(canvas.get_pixel(50, 5), &GRID_BACKGROUND);
    }

    #[test]
    fn test_assemble_grid_rejects_empty_and_zero_width_rows() {
        let layout = CardLayout::default();
        assert!(matches!(
            assemble_grid(&[], 3, &layout, MARGIN),
            Err(RenderError::EmptyInput)
        ));
        let card = RgbaImage::new(layout.width, layout.height);
        assert!(matches!(
            assemble_grid(&[card], 0, &layout, MARGIN),
            Err(RenderError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_row_math_uses_checked_arithmetic() {
        assert_eq!(row_width(3, 300, 16).expect("fits"), 964);
        assert_eq!(row_height(250, 16).expect("fits"), 282);
        assert!(matches!(
            row_width(usize::MAX, 300, 16),
            Err(RenderError::InvalidLayout(_))
        ));
        assert!(matches!(
            row_width(1 << 24, 300, 16),
            Err(RenderError::InvalidLayout(_))
        ));
        assert!(matches!(
            row_height(u32::MAX, 1),
            Err(RenderError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_grid_size_rejects_oversized_canvas() {
        let layout = CardLayout::default();
        assert_eq!(grid_size(4, 3, &layout, MARGIN).expect("fits"), (964, 564));
        assert!(matches!(
            grid_size(1_000_000, 3, &layout, MARGIN),
            Err(RenderError::InvalidLayout(_))
        ));
        let card = RgbaImage::new(layout.width, layout.height);
        assert!(matches!(
            assemble_grid(&[card], usize::MAX, &layout, MARGIN),
            Err(RenderError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_flatten_to_jpeg_has_canvas_dimensions() {
        let canvas = RgbaImage::from_pixel(40, 24, Rgba([0, 0, 0, 0]));
        let bytes = flatten_to_jpeg(&canvas, 70).expect("flatten should encode");
        let decoded = image::load_from_memory(&bytes).expect("output should decode");
        assert_eq!(decoded.dimensions(), (40, 24));
        let pixel = decoded.to_rgb8().get_pixel(20, 12).0;
        assert!(pixel.iter().all(|channel| *channel >= 0xf0));
    }

    #[tokio::test]
    async fn test_render_rejects_empty_items_without_fetching() {
        let source = StubSource::new(encode_test_png(4, 4, [1, 2, 3]), Duration::ZERO);
        let compositor = compositor("empty_items", source, Duration::from_secs(5));

        let error = compositor
            .render(&[], GridOptions::default())
            .await
            .expect_err("empty batch must be rejected");
        assert!(matches!(error, RenderError::EmptyInput));
        assert_eq!(compositor.fetcher.source().calls(), 0);
        cleanup(&compositor);
    }

    #[tokio::test]
    async fn test_render_with_failed_item_returns_full_grid() {
        let source = StubSource::new(encode_test_png(8, 8, [10, 20, 30]), Duration::from_millis(5))
            .failing("https://i0.example.test/1.jpg");
        let compositor = compositor("failed_item", source, Duration::from_secs(10));

        let bytes = compositor
            .render(&items(4), GridOptions::default())
            .await
            .expect("batch should complete despite one failure");
        let decoded = image::load_from_memory(&bytes).expect("grid should decode");
        assert_eq!(decoded.dimensions(), (964, 2 * 282));
        assert_eq!(compositor.fetcher.source().calls(), 4);
        cleanup(&compositor);
    }

    #[tokio::test]
    async fn test_render_cards_preserves_input_order() {
        let source = StubSource::new(encode_test_png(8, 8, [10, 20, 30]), Duration::from_millis(5))
            .failing("https://i0.example.test/0.jpg")
            .failing("https://i0.example.test/2.jpg");
        let compositor = compositor("input_order", source, Duration::from_secs(10));

        let cards = compositor.render_cards(&items(4)).await;
        assert_eq!(cards.len(), 4);
        for card in &cards {
            assert_eq!(card.dimensions(), (300, 250));
        }
        let blank = Rgba([255, 255, 255, 255]);
        let thumb = Rgba([10, 20, 30, 255]);
        assert_eq!(cards[0].get_pixel(150, 5), &blank);
        assert_eq!(cards[1].get_pixel(150, 5), &thumb);
        assert_eq!(cards[2].get_pixel(150, 5), &blank);
        assert_eq!(cards[3].get_pixel(150, 5), &thumb);
        cleanup(&compositor);
    }

    #[tokio::test]
    async fn test_render_cards_number_each_card_by_position() {
        let source = StubSource::new(encode_test_png(8, 8, [10, 20, 30]), Duration::ZERO);
        let compositor = compositor_with_painter(
            "ordinals",
            source,
            Duration::from_secs(10),
            Arc::new(CharCodePainter),
        );

        let cards = compositor.render_cards(&items(9)).await;
        let layout = CardLayout::default();
        for (position, card) in cards.iter().enumerate() {
            let expected = b'0' + position as u8 + 1;
            let pixel = card.get_pixel(layout.width - 30, layout.height - 20);
            assert_eq!(pixel.0[0], expected, "card {position} ordinal");
        }
        cleanup(&compositor);
    }

    #[tokio::test]
    async fn test_render_rejects_overflowing_cards_per_row_without_fetching() {
        let source = StubSource::new(encode_test_png(4, 4, [1, 2, 3]), Duration::ZERO);
        let compositor = compositor("overflow_per_row", source, Duration::from_secs(5));
        let options = GridOptions {
            cards_per_row: usize::MAX,
            quality: 70,
        };
        let error = compositor
            .render(&items(2), options)
            .await
            .expect_err("overflowing row width must be rejected");
        assert!(matches!(error, RenderError::InvalidLayout(_)));
        assert_eq!(compositor.fetcher.source().calls(), 0);
        cleanup(&compositor);
    }

    #[tokio::test]
    async fn test_render_rejects_zero_cards_per_row() {
        let source = StubSource::new(encode_test_png(4, 4, [1, 2, 3]), Duration::ZERO);
        let compositor = compositor("zero_per_row", source, Duration::from_secs(5));
        let options = GridOptions {
            cards_per_row: 0,
            quality: 70,
        };
        let error = compositor
            .render(&items(2), options)
            .await
            .expect_err("zero cards per row must be rejected");
        assert!(matches!(error, RenderError::InvalidLayout(_)));
        cleanup(&compositor);
    }

    #[tokio::test]
    async fn test_batch_timeout_degrades_to_blank_cards() {
        let source = StubSource::new(encode_test_png(4, 4, [1, 2, 3]), Duration::from_secs(30));
        let compositor = compositor("batch_timeout", source, Duration::from_millis(50));

        let started = Instant::now();
        let bytes = compositor
            .render(&items(2), GridOptions::default())
            .await
            .expect("timed-out batch still completes");
        assert!(started.elapsed() < Duration::from_secs(10));
        let decoded = image::load_from_memory(&bytes).expect("grid should decode");
        assert_eq!(decoded.dimensions(), (964, 282));
        cleanup(&compositor);
    }
}
