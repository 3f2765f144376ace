use std::fmt;
use std::fs;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::database::repo::{self, Store};
use crate::error::{PipelineError, Result};
use crate::ingest::assets;
use crate::ingest::fetcher::CatalogClient;
use crate::ml::annotate;
use crate::ml::vision::ImageAnnotator;
use crate::utils::config::{PipelineConfig, StageFlags};

/// Per-stage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}, skipped: {}, failed: {}",
            self.processed, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    Skip,
    Run { force: bool },
}

impl StageMode {
    fn from_flags(skip: bool, force: bool) -> Self {
        if force {
            StageMode::Run { force: true }
        } else if skip {
            StageMode::Skip
        } else {
            StageMode::Run { force: false }
        }
    }
}

impl fmt::Display for StageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageMode::Skip => f.write_str("skip"),
            StageMode::Run { force: true } => f.write_str("forced"),
            StageMode::Run { force: false } => f.write_str("run"),
        }
    }
}

/// Which stages run, fixed before the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub load_catalog: StageMode,
    pub sync_assets: StageMode,
    pub annotate: StageMode,
}

impl StagePlan {
    /// An existing database file counts as a skip request for the load stage.
    pub fn resolve(flags: &StageFlags, db_exists: bool) -> Self {
        Self {
            load_catalog: StageMode::from_flags(
                flags.skip_database_creation || db_exists,
                flags.force_database_creation,
            ),
            sync_assets: StageMode::from_flags(flags.skip_image_download, flags.force_image_download),
            annotate: StageMode::from_flags(flags.skip_ia_analysis, flags.force_ia_analysis),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub items_loaded: Option<usize>,
    pub assets: Option<StageReport>,
    pub annotations: Option<StageReport>,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    client: &'a dyn CatalogClient,
    annotator: &'a dyn ImageAnnotator,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        client: &'a dyn CatalogClient,
        annotator: &'a dyn ImageAnnotator,
    ) -> Self {
        Self {
            config,
            client,
            annotator,
        }
    }

    /// Runs load, asset sync and annotation in that order.
    ///
    /// The store is opened once and closed on every exit path; a failed
    /// close is logged and does not change the result. A database file
    /// created by a run that failed before loading the catalog is removed,
    /// so the next run loads again.
    pub fn run(&self) -> Result<RunSummary> {
        let db_exists = self.config.db_path.exists();
        let plan = StagePlan::resolve(&self.config.flags, db_exists);
        info!(
            "Stage plan: database {}, images {}, analysis {}",
            plan.load_catalog, plan.sync_assets, plan.annotate
        );

        self.check_settings(&plan)?;

        let mut store = Store::open(&self.config.db_path)?;
        let mut summary = RunSummary::default();
        let outcome = self.run_stages(&mut store, &plan, &mut summary);

        match store.close() {
            Ok(()) => info!("Database closed"),
            Err(e) => error!("Failed to close database: {}", e),
        }

        if outcome.is_err() && !db_exists && summary.items_loaded.is_none() {
            self.discard_database();
        }

        outcome.map(|()| summary)
    }

    fn discard_database(&self) {
        match fs::remove_file(&self.config.db_path) {
            Ok(()) => warn!("Removed incomplete database {:?}", self.config.db_path),
            Err(e) => error!(
                "Failed to remove incomplete database {:?}: {}",
                self.config.db_path, e
            ),
        }
    }

    fn run_stages(
        &self,
        store: &mut Store,
        plan: &StagePlan,
        summary: &mut RunSummary,
    ) -> Result<()> {
        match plan.load_catalog {
            StageMode::Skip => info!("Database creation skipped"),
            StageMode::Run { .. } => {
                info!("Fetching catalog from {}", self.config.server);
                let items = self.client.fetch_catalog(&self.config.server)?;
                info!("Fetched {} items", items.len());
                summary.items_loaded = Some(repo::sync_catalog(store, &items)?);
            }
        }

        match plan.sync_assets {
            StageMode::Skip => info!("Image download skipped"),
            StageMode::Run { force } => {
                summary.assets = Some(assets::sync_assets(store, self.client, self.config, force)?);
            }
        }

        match plan.annotate {
            StageMode::Skip => info!("Image analysis skipped"),
            StageMode::Run { force } => {
                summary.annotations =
                    Some(annotate::annotate(store, self.annotator, self.config, force)?);
            }
        }

        Ok(())
    }

    /// Fails before anything is opened when a planned stage lacks its endpoint.
    fn check_settings(&self, plan: &StagePlan) -> Result<()> {
        let required = [
            (plan.load_catalog, "SERVER", &self.config.server),
            (plan.sync_assets, "IMAGE_API_PATH", &self.config.image_api_path),
            (plan.annotate, "BACKEND_LMSTUDIO_URL", &self.config.lmstudio_url),
        ];

        for (mode, key, value) in required {
            if mode != StageMode::Skip && value.is_empty() {
                return Err(PipelineError::Config(format!("{} is not set", key)));
            }
        }
        Ok(())
    }
}

/// Progress bar for a per-item stage loop. Hidden when stderr is not a terminal.
pub(crate) fn progress_bar(len: usize, label: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("  {prefix:>8} [{bar:30.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_prefix(label);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, FakeAnnotator, FakeCatalog};
    use serde_json::json;
    use std::fs;

    fn catalog() -> FakeCatalog {
        FakeCatalog::with_items(json!([
            {"sku": "A1", "description": "Red shoe", "imageUrlSmall": "/img/Small/a1.jpg"},
            {"sku": "B2", "description": "Blue mug", "imageUrlSmall": "/img/Small/b2.png"}
        ]))
    }

    fn count_items(config: &PipelineConfig) -> anyhow::Result<usize> {
        let store = Store::open(&config.db_path)?;
        let rows = store.query("SELECT id FROM items", &[])?;
        store.close()?;
        Ok(rows.len())
    }

    #[test]
    fn test_force_beats_skip() {
        let flags = StageFlags {
            skip_database_creation: true,
            force_database_creation: true,
            skip_image_download: true,
            force_image_download: true,
            skip_ia_analysis: true,
            force_ia_analysis: true,
        };
        let plan = StagePlan::resolve(&flags, true);
        assert_eq!(plan.load_catalog, StageMode::Run { force: true });
        assert_eq!(plan.sync_assets, StageMode::Run { force: true });
        assert_eq!(plan.annotate, StageMode::Run { force: true });
    }

    #[test]
    fn test_existing_database_skips_load() {
        let flags = StageFlags::default();
        assert_eq!(StagePlan::resolve(&flags, true).load_catalog, StageMode::Skip);
        assert_eq!(
            StagePlan::resolve(&flags, false).load_catalog,
            StageMode::Run { force: false }
        );

        let skip = StageFlags { skip_database_creation: true, ..StageFlags::default() };
        assert_eq!(StagePlan::resolve(&skip, false).load_catalog, StageMode::Skip);
    }

    #[test]
    fn test_skip_flags() {
        let flags = StageFlags {
            skip_image_download: true,
            skip_ia_analysis: true,
            ..StageFlags::default()
        };
        let plan = StagePlan::resolve(&flags, false);
        assert_eq!(plan.sync_assets, StageMode::Skip);
        assert_eq!(plan.annotate, StageMode::Skip);
    }

    #[test]
    fn test_full_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let client = catalog();
        let annotator = FakeAnnotator::replying("EN: shoe\nFR: chaussure\nDE: Schuh");

        let summary = Pipeline::new(&config, &client, &annotator).run()?;

        assert_eq!(summary.items_loaded, Some(2));
        assert_eq!(summary.assets, Some(StageReport { processed: 2, skipped: 0, failed: 0 }));
        assert_eq!(
            summary.annotations,
            Some(StageReport { processed: 2, skipped: 0, failed: 0 })
        );
        assert!(config.download_root.join("Small").join("b2.png").exists());
        assert_eq!(client.fetches(), 1);
        Ok(())
    }

    #[test]
    fn test_second_run_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let annotator = FakeAnnotator::replying("EN: shoe");

        Pipeline::new(&config, &catalog(), &annotator).run()?;
        assert_eq!(count_items(&config)?, 2);

        let client = catalog();
        let summary = Pipeline::new(&config, &client, &annotator).run()?;

        assert_eq!(client.fetches(), 0);
        assert_eq!(summary.items_loaded, None);
        assert_eq!(count_items(&config)?, 2);
        assert_eq!(summary.assets, Some(StageReport { processed: 0, skipped: 2, failed: 0 }));
        assert_eq!(
            summary.annotations,
            Some(StageReport { processed: 0, skipped: 2, failed: 0 })
        );
        assert!(client.downloaded().is_empty());
        Ok(())
    }

    #[test]
    fn test_forced_load_runs_on_existing_database() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path());
        config.flags.skip_image_download = true;
        config.flags.skip_ia_analysis = true;
        let annotator = FakeAnnotator::replying("");

        Pipeline::new(&config, &catalog(), &annotator).run()?;

        config.flags.skip_database_creation = true;
        config.flags.force_database_creation = true;
        let client = catalog();
        let summary = Pipeline::new(&config, &client, &annotator).run()?;

        assert_eq!(client.fetches(), 1);
        assert_eq!(summary.items_loaded, Some(2));
        Ok(())
    }

    #[test]
    fn test_missing_endpoint_fails_before_opening() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path());
        config.server.clear();
        let annotator = FakeAnnotator::replying("");

        let result = Pipeline::new(&config, &catalog(), &annotator).run();

        assert!(matches!(result, Err(PipelineError::Config(_))));
        assert!(!config.db_path.exists());
        Ok(())
    }

    #[test]
    fn test_empty_catalog_aborts_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let client = FakeCatalog::with_items(json!([]));
        let annotator = FakeAnnotator::replying("");

        let result = Pipeline::new(&config, &client, &annotator).run();

        assert!(matches!(result, Err(PipelineError::Load(_))));
        assert!(!config.download_root.exists());
        assert!(!config.db_path.exists());
        Ok(())
    }

    #[test]
    fn test_failed_first_load_is_retried() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let annotator = FakeAnnotator::replying("EN: shoe");

        let empty = FakeCatalog::with_items(json!([]));
        assert!(Pipeline::new(&config, &empty, &annotator).run().is_err());

        let client = catalog();
        let summary = Pipeline::new(&config, &client, &annotator).run()?;

        assert_eq!(client.fetches(), 1);
        assert_eq!(summary.items_loaded, Some(2));
        assert_eq!(count_items(&config)?, 2);
        Ok(())
    }

    #[test]
    fn test_existing_database_kept_after_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path());
        config.flags.skip_image_download = true;
        let annotator = FakeAnnotator::replying("EN: shoe");

        // A table without the image column makes the annotation listing fail
        let store = Store::open(&config.db_path)?;
        store.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, sku TEXT)", &[])?;
        store.close()?;

        let result = Pipeline::new(&config, &catalog(), &annotator).run();

        assert!(matches!(result, Err(PipelineError::Store(_))));
        assert!(config.db_path.exists());
        Ok(())
    }

    #[test]
    fn test_annotation_resumes_after_download_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let annotator = FakeAnnotator::replying("EN: mug");

        let flaky = catalog().failing_on("https://cdn.test/img/Small/b2.png");
        let first = Pipeline::new(&config, &flaky, &annotator).run()?;
        assert_eq!(first.assets.map(|r| r.failed), Some(1));
        assert_eq!(first.annotations.map(|r| r.failed), Some(1));

        let healthy = catalog();
        let second = Pipeline::new(&config, &healthy, &annotator).run()?;
        assert_eq!(second.assets, Some(StageReport { processed: 1, skipped: 1, failed: 0 }));
        assert_eq!(
            second.annotations,
            Some(StageReport { processed: 1, skipped: 1, failed: 0 })
        );
        assert!(fs::metadata(config.download_root.join("Small").join("b2.png"))?.is_file());
        Ok(())
    }
}
