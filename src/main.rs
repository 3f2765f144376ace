use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use catalog_annotator::ingest::fetcher::HttpCatalogClient;
use catalog_annotator::ml::vision::VisionClient;
use catalog_annotator::utils::config::{self, PipelineConfig};
use catalog_annotator::{Pipeline, RunSummary};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(short, long, default_value = "database.db")]
    db_path: PathBuf,

    /// Root directory for downloaded images
    #[arg(long, default_value = "downloaded_images")]
    download_root: PathBuf,

    /// Dotenv file read before the environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    info!("Catalog pipeline starting...");

    // Failures are reported, not turned into an exit code
    match run(args) {
        Ok(summary) => {
            if let Some(n) = summary.items_loaded {
                info!("Catalog: {} items loaded", n);
            }
            if let Some(report) = summary.assets {
                info!("Images: {}", report);
            }
            if let Some(report) = summary.annotations {
                info!("Analysis: {}", report);
            }
            info!("Pipeline completed.");
        }
        Err(e) => error!("Pipeline failed: {:#}", e),
    }
}

fn run(args: Args) -> Result<RunSummary> {
    config::load_env_file(&args.env_file)?;

    let config = PipelineConfig::from_env(args.db_path, args.download_root)?;
    info!("DB: {:?}", config.db_path);
    info!("Images: {:?}", config.download_root);

    let client = HttpCatalogClient::new(config.request_timeout)?;
    let annotator = VisionClient::new(&config.lmstudio_url, &config.model, config.request_timeout)?;

    Ok(Pipeline::new(&config, &client, &annotator).run()?)
}
