//! Render a product configuration against an engine document.
//!
//! Writes the generated node tree as pretty-printed JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use layers::{Engines, MemoryEngine, Product, State};
use map_common::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "render-product")]
#[command(about = "Generate the layer tree of a map product")]
struct Args {
    /// Product configuration (JSON)
    #[arg(short, long)]
    product: PathBuf,

    /// Engine document with grids, shapes and keywords (JSON)
    #[arg(short, long, env = "RENDER_DATA")]
    data: PathBuf,

    /// Default valid time for the product (ISO 8601)
    #[arg(short, long)]
    time: Option<String>,

    /// Animation frame to render
    #[arg(long, default_value_t = 0)]
    loop_step: u32,

    /// Number of animation frames
    #[arg(long, default_value_t = 1)]
    loop_steps: u32,

    /// Output file, stdout if omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "RENDER_LOG_FORMAT")]
    log_format: LogFormat,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn run(args: &Args) -> Result<()> {
    let engine = MemoryEngine::from_file(&args.data)?;
    let mut state = State::new(Engines::from_memory(Arc::new(engine)));
    if let Some(time) = &args.time {
        state.set_time(Some(map_common::parse_time(time).context("Invalid --time")?));
    }
    state.set_animation(args.loop_step, args.loop_steps)?;

    let text = std::fs::read_to_string(&args.product)
        .with_context(|| format!("Failed to read product {}", args.product.display()))?;
    let config: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", args.product.display()))?;

    let mut product = Product::init(config, &mut state)?;
    debug!(hash = product.hash_value(), "product hash");
    let output = product.generate(&mut state)?;
    debug!(
        modified = ?state.modification_time(),
        expires = ?state.expiration_time(),
        "data times"
    );

    let json = serde_json::to_string_pretty(&output)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote product");
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<RenderError>() {
                Some(render) => {
                    eprintln!("{}", render.report());
                    ExitCode::from(render.kind().exit_code() as u8)
                }
                None => {
                    eprintln!("Error: {:#}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
