use tracing::{debug, error, info, warn};

use crate::database::repo::{ImageRef, Store};
use crate::error::{PipelineError, Result};
use crate::ingest::assets;
use crate::ml::annotation::Annotation;
use crate::ml::vision::ImageAnnotator;
use crate::pipeline::{self, StageReport};
use crate::utils::config::PipelineConfig;

const PREVIEW_CHARS: usize = 50;

enum Outcome {
    Annotated,
    Skipped,
}

/// Stage 5: fill in the multilingual descriptions from the cached images.
///
/// Items with at least one description are left alone unless `force` is
/// set. Per-item failures are logged and counted; the item keeps its
/// previous state and is picked up again on the next run.
pub fn annotate(
    store: &Store,
    annotator: &dyn ImageAnnotator,
    config: &PipelineConfig,
    force: bool,
) -> Result<StageReport> {
    let refs = store.image_refs()?;
    info!("{} items found for image analysis", refs.len());

    let mut report = StageReport::default();
    let pb = pipeline::progress_bar(refs.len(), "analysis");

    for item in &refs {
        pb.inc(1);
        match annotate_item(store, annotator, config, force, item) {
            Ok(Outcome::Annotated) => report.processed += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) => {
                error!("Item {}: {}", item.id, e);
                report.failed += 1;
            }
        }
    }

    pb.finish_and_clear();
    info!("Image analysis finished. {}", report);
    Ok(report)
}

fn annotate_item(
    store: &Store,
    annotator: &dyn ImageAnnotator,
    config: &PipelineConfig,
    force: bool,
    item: &ImageRef,
) -> Result<Outcome> {
    let annotated = store
        .annotation(item.id)?
        .map(|a| a.has_any())
        .unwrap_or(false);

    if annotated {
        if !force {
            debug!("Item {}: already described, skipped", item.id);
            return Ok(Outcome::Skipped);
        }
        info!("Item {}: already described, analysis forced", item.id);
    }

    let Some(reference) = item.reference.as_deref() else {
        debug!("Item {}: no image reference, skipped", item.id);
        return Ok(Outcome::Skipped);
    };

    let context = store
        .article_context(item.id)?
        .ok_or_else(|| PipelineError::Analysis("item details could not be read".to_string()))?;

    let path = assets::asset_path(&config.download_root, reference)
        .filter(|p| p.exists())
        .ok_or_else(|| {
            PipelineError::Analysis(format!("image not found locally for {:?}", reference))
        })?;

    debug!("Item {}: analysing {:?}", item.id, path);
    let annotation = annotator.analyze(&path, Some(&context))?;

    store.update_annotation(item.id, &annotation)?;
    log_annotation(item.id, &annotation);

    Ok(Outcome::Annotated)
}

fn log_annotation(id: i64, annotation: &Annotation) {
    if annotation.is_liquidation() {
        info!("Item {}: liquidation stamp detected", id);
    } else if !annotation.has_any() {
        warn!("Item {}: model reply had no recognised labels, stored empty descriptions", id);
    } else {
        info!(
            "Item {}: descriptions updated. EN: {} | FR: {} | DE: {}",
            id,
            preview(&annotation.en),
            preview(&annotation.fr),
            preview(&annotation.de)
        );
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}
