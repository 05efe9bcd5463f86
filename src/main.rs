mod card_renderer;
mod config;
mod error;
mod fetcher;
mod grid_compositor;
mod image_cache;
mod image_pipeline;
mod item;
mod lyric_renderer;
mod text_render;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

use card_renderer::{CardLayout, CardRenderer};
use config::Config;
use error::{RenderError, RenderResult};
use fetcher::{BoundedFetcher, UreqSource};
use grid_compositor::{GridCompositor, GridOptions};
use image_cache::ImageCache;
use lyric_renderer::{LyricRenderer, LyricStyle};
use text_render::{FontPainter, TextPainter};

/// Renders music search results as a card grid, or lyrics as a gradient image.
#[derive(Parser, Debug)]
#[command(name = "cardgrid", version)]
struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Font file overriding `[text].font_path`.
    #[arg(long, global = true, value_name = "FILE")]
    font: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a JSON array of search results into one JPEG grid.
    Grid {
        #[arg(long, value_name = "FILE")]
        items: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long)]
        per_row: Option<usize>,
        #[arg(long)]
        quality: Option<u8>,
    },
    /// Render lyric text (`-` for stdin) into a JPEG.
    Lyrics {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Write the default config file if it does not exist yet.
    InitConfig,
}

fn resolve_config_path(cli: &Cli) -> RenderResult<PathBuf> {
    cli.config
        .clone()
        .or_else(config::default_config_path)
        .ok_or_else(|| RenderError::Config("no config directory available".to_string()))
}

fn load_painter(cli: &Cli, config: &Config) -> RenderResult<Arc<dyn TextPainter>> {
    let font_path = match &cli.font {
        Some(path) => path.clone(),
        None if !config.text.font_path.trim().is_empty() => {
            PathBuf::from(config.text.font_path.trim())
        }
        None => {
            return Err(RenderError::Font(
                "no font configured; pass --font or set [text].font_path".to_string(),
            ))
        }
    };
    Ok(Arc::new(FontPainter::from_path(&font_path)?))
}

fn read_input(path: &Path) -> RenderResult<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    Ok(std::fs::read_to_string(path)?)
}

fn render_grid(
    config: &Config,
    painter: Arc<dyn TextPainter>,
    items_path: &Path,
    options: GridOptions,
) -> RenderResult<Vec<u8>> {
    let items = item::parse_items(&read_input(items_path)?)
        .map_err(|error| RenderError::Config(format!("invalid items file: {error}")))?;
    info!("rendering {} items from {}", items.len(), items_path.display());

    let cache = ImageCache::new(config.cache_root())?;
    let cache_for_usage = cache.clone();
    let fetcher = Arc::new(BoundedFetcher::with_capacity(
        UreqSource::new(&config.fetch),
        cache,
        config.fetch.max_concurrency,
    ));
    let renderer = Arc::new(CardRenderer::new(CardLayout::from(&config.card), painter));
    let compositor = GridCompositor::new(
        fetcher,
        renderer,
        config.card.margin,
        Duration::from_secs(config.fetch.batch_timeout_secs),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let bytes = runtime.block_on(compositor.render(&items, options))?;
    // The cache never evicts; surface its size so hosts can prune it.
    info!(
        "thumbnail cache holds {} bytes at {}",
        cache_for_usage.disk_usage_bytes(),
        cache_for_usage.root().display()
    );
    Ok(bytes)
}

fn run(cli: Cli) -> RenderResult<()> {
    let config_path = resolve_config_path(&cli)?;
    let config = config::load_or_create(&config_path)?;

    match &cli.command {
        Command::InitConfig => {
            info!("config ready at {}", config_path.display());
        }
        Command::Grid {
            items,
            out,
            per_row,
            quality,
        } => {
            let painter = load_painter(&cli, &config)?;
            let options = GridOptions {
                cards_per_row: per_row.unwrap_or(config.grid.cards_per_row),
                quality: quality.unwrap_or(config.grid.quality),
            };
            let bytes = render_grid(&config, painter, items, options)?;
            std::fs::write(out, &bytes)?;
            info!("wrote grid image ({} bytes) to {}", bytes.len(), out.display());
        }
        Command::Lyrics { input, out } => {
            let painter = load_painter(&cli, &config)?;
            let renderer = LyricRenderer::new(painter, LyricStyle::from(&config.lyrics));
            let bytes = renderer.render(&read_input(input)?)?;
            std::fs::write(out, &bytes)?;
            info!("wrote lyric image ({} bytes) to {}", bytes.len(), out.display());
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    run(cli)?;
    Ok(())
}
