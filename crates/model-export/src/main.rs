//! model-export: save a sentence-embedding model and write its model_info.txt.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use model_export::config::{expand_tilde, Config, DEFAULT_REVISION};
use model_export::Converter;

#[derive(Parser, Debug)]
#[command(name = "model-export")]
#[command(about = "Save a pretrained sentence-embedding model with a model_info.txt summary")]
struct Args {
    /// Hub repository id or local model directory
    #[arg(short, long, env = "MODEL_EXPORT_MODEL", default_value = "sentence-transformers/all-MiniLM-L6-v2")]
    model: String,

    /// Directory to save the model into (created if missing)
    #[arg(short, long, env = "MODEL_EXPORT_OUTPUT", default_value = "models/all-MiniLM-L6-v2")]
    output: PathBuf,

    /// Branch, tag or commit to download
    #[arg(long, default_value = DEFAULT_REVISION)]
    revision: String,

    /// Download cache directory (defaults to MODEL_EXPORT_CACHE_DIR or the platform cache dir)
    #[arg(long)]
    cache_dir: Option<String>,

    /// Hub base URL (defaults to HF_ENDPOINT or https://huggingface.co)
    #[arg(long)]
    endpoint: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,model_export=debug"
    } else {
        "info,model_export=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let mut config = Config::from_env()?;
    config.revision = args.revision;
    if let Some(dir) = args.cache_dir {
        config.cache_dir = Some(expand_tilde(&dir));
    }
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }

    info!("Hub endpoint: {}", config.endpoint);
    if let Some(dir) = &config.cache_dir {
        info!("Cache directory: {}", dir.display());
    }

    let converter = Converter::new(&config)?;
    converter.convert(&args.model, &args.output).await?;

    Ok(())
}
