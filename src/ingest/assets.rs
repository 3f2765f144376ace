use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::database::repo::Store;
use crate::error::Result;
use crate::ingest::fetcher::CatalogClient;
use crate::pipeline::{self, StageReport};
use crate::utils::config::PipelineConfig;

/// Sub-directory of the download root holding small images.
pub const SMALL_DIR: &str = "Small";

/// Local file for an image reference: `<root>/Small/<basename>`.
pub fn asset_path(root: &Path, reference: &str) -> Option<PathBuf> {
    let name = Path::new(reference).file_name()?;
    Some(root.join(SMALL_DIR).join(name))
}

/// Stage 4: make sure every referenced image is on disk.
///
/// Failures are logged and counted per item; only the initial listing can
/// fail the stage.
pub fn sync_assets(
    store: &Store,
    client: &dyn CatalogClient,
    config: &PipelineConfig,
    force: bool,
) -> Result<StageReport> {
    let refs = store.image_refs()?;
    info!("{} items found for image download", refs.len());

    let mut report = StageReport::default();
    let pb = pipeline::progress_bar(refs.len(), "images");

    for item in refs {
        pb.inc(1);

        let Some(reference) = item.reference else {
            debug!("Item {}: no image reference", item.id);
            continue;
        };

        let Some(path) = asset_path(&config.download_root, &reference) else {
            error!("Item {}: no file name in image reference {:?}", item.id, reference);
            report.failed += 1;
            continue;
        };

        if path.exists() && !force {
            debug!("Item {}: image already downloaded: {:?}", item.id, path);
            report.skipped += 1;
            continue;
        }

        let url = format!("{}{}", config.image_api_path, reference);
        match client.download_asset(&url, &path) {
            Ok(()) => {
                debug!("Item {}: downloaded {:?}", item.id, path);
                report.processed += 1;
            }
            Err(e) => {
                error!("Item {}: image download failed: {}", item.id, e);
                report.failed += 1;
            }
        }
    }

    pb.finish_and_clear();
    info!("Image download finished. {}", report);
    Ok(report)
}
