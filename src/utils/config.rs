use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::ml::vision::DEFAULT_MODEL;

/// Skip/force switches for the three stages. Force wins over skip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageFlags {
    pub skip_database_creation: bool,
    pub force_database_creation: bool,
    pub skip_image_download: bool,
    pub force_image_download: bool,
    pub skip_ia_analysis: bool,
    pub force_ia_analysis: bool,
}

/// Everything a run needs, read once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Catalog endpoint returning the JSON array of items.
    pub server: String,
    /// Not sent with any request yet.
    pub token: Option<String>,
    /// Prefix joined with each item's image reference.
    pub image_api_path: String,
    pub lmstudio_url: String,
    pub model: String,
    pub request_timeout: Option<Duration>,
    pub db_path: PathBuf,
    pub download_root: PathBuf,
    pub flags: StageFlags,
}

impl PipelineConfig {
    pub fn from_env(db_path: PathBuf, download_root: PathBuf) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), db_path, download_root)
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, db_path: PathBuf, download_root: PathBuf) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        // Only the literal "true" enables a flag
        let flag = |key: &str| lookup(key).as_deref() == Some("true");

        let request_timeout = match get("REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("REQUEST_TIMEOUT_SECS is not a number: {:?}", raw))?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            server: get("SERVER").unwrap_or_default(),
            token: get("TOKEN"),
            image_api_path: get("IMAGE_API_PATH").unwrap_or_default(),
            lmstudio_url: get("BACKEND_LMSTUDIO_URL").unwrap_or_default(),
            model: get("LMSTUDIO_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            request_timeout,
            db_path,
            download_root,
            flags: StageFlags {
                skip_database_creation: flag("SKIP_DATABASE_CREATION"),
                force_database_creation: flag("FORCE_DATABASE_CREATION"),
                skip_image_download: flag("SKIP_IMAGE_DOWNLOAD"),
                force_image_download: flag("FORCE_IMAGE_DOWNLOAD"),
                skip_ia_analysis: flag("SKIP_IA_DESCRIPTION_ANALYSIS"),
                force_ia_analysis: flag("FORCE_IA_DESCRIPTION_ANALYSIS"),
            },
        })
    }
}

/// Loads a dotenv file into the process environment if it exists.
/// Variables already set in the environment are kept.
pub fn load_env_file(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    dotenv::from_path(path).map_err(|e| anyhow!("Failed to read {:?}: {}", path, e))?;
    info!("Loaded environment from {:?}", path);
    Ok(true)
}
