use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::ingest::item::Item;

/// Remote side of the pipeline: the catalog endpoint and the image CDN.
pub trait CatalogClient {
    /// Fetches the whole catalog as one JSON array.
    fn fetch_catalog(&self, url: &str) -> Result<Vec<Item>>;

    /// Downloads `url` to `destination`, replacing any existing file.
    fn download_asset(&self, url: &str, destination: &Path) -> Result<()>;
}

pub struct HttpCatalogClient {
    http: Client,
}

impl HttpCatalogClient {
    /// `None` leaves requests without a timeout.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

impl CatalogClient for HttpCatalogClient {
    fn fetch_catalog(&self, url: &str) -> Result<Vec<Item>> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .send()
            .map_err(|e| PipelineError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(url, format!("HTTP {}", status)));
        }

        let body = response.text().map_err(|e| PipelineError::fetch(url, e))?;
        debug!("Catalog response: {} bytes", body.len());
        parse_catalog(&body)
    }

    fn download_asset(&self, url: &str, destination: &Path) -> Result<()> {
        let mut response = self
            .http
            .get(url)
            .send()
            .map_err(|e| PipelineError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(url, format!("HTTP {}", status)));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        write_atomically(&mut response, destination).map_err(|e| PipelineError::fetch(url, e))
    }
}

/// Parses a catalog body. Every element of the array must be a JSON object.
pub fn parse_catalog(body: &str) -> Result<Vec<Item>> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let elements = value
        .as_array()
        .ok_or_else(|| PipelineError::Parse("expected a JSON array".to_string()))?;

    elements
        .iter()
        .enumerate()
        .map(|(i, element)| {
            Item::from_json(element)
                .ok_or_else(|| PipelineError::Parse(format!("element {} is not an object", i)))
        })
        .collect()
}

/// Copies `reader` into a sibling `.part` file and renames it onto
/// `destination` once the copy has completed. On failure the partial file
/// is removed and `destination` is left as it was.
pub fn write_atomically(reader: &mut impl Read, destination: &Path) -> io::Result<()> {
    let partial = partial_path(destination);

    let copied = File::create(&partial).and_then(|file| {
        let mut writer = BufWriter::new(file);
        io::copy(reader, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    });

    if let Err(e) = copied {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    fs::rename(&partial, destination)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}
