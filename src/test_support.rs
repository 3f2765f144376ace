//! In-process stand-ins for the catalog API, the image CDN and the vision model.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use serde_json::Value;

use crate::database::repo::{self, Store};
use crate::error::{PipelineError, Result};
use crate::ingest::fetcher::CatalogClient;
use crate::ingest::item::Item;
use crate::ml::annotation::{self, Annotation, ArticleContext};
use crate::ml::vision::{ImageAnnotator, DEFAULT_MODEL};
use crate::utils::config::{PipelineConfig, StageFlags};

pub const IMAGE_BYTES: &[u8] = b"image bytes";

pub fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        server: "https://api.test/items".to_string(),
        token: None,
        image_api_path: "https://cdn.test".to_string(),
        lmstudio_url: "http://llm.test".to_string(),
        model: DEFAULT_MODEL.to_string(),
        request_timeout: None,
        db_path: root.join("database.db"),
        download_root: root.join("downloaded_images"),
        flags: StageFlags::default(),
    }
}

pub fn items(catalog: Value) -> Vec<Item> {
    catalog
        .as_array()
        .map(|a| a.iter().filter_map(Item::from_json).collect())
        .unwrap_or_default()
}

pub fn seeded_store(catalog: Value) -> Result<Store> {
    let mut store = Store::open_in_memory()?;
    repo::sync_catalog(&mut store, &items(catalog))?;
    Ok(store)
}

/// Writes a cached image for `name` under the download root.
pub fn cache_image(config: &PipelineConfig, name: &str) -> std::io::Result<PathBuf> {
    let path = config.download_root.join("Small").join(name);
    fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
    fs::write(&path, IMAGE_BYTES)?;
    Ok(path)
}

#[derive(Default)]
pub struct FakeCatalog {
    items: Vec<Item>,
    failing: Vec<String>,
    fetches: Cell<usize>,
    downloads: RefCell<Vec<String>>,
}

impl FakeCatalog {
    pub fn with_items(catalog: Value) -> Self {
        Self {
            items: items(catalog),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }

    /// URLs downloaded successfully, in call order.
    pub fn downloaded(&self) -> Vec<String> {
        self.downloads.borrow().clone()
    }
}

impl CatalogClient for FakeCatalog {
    fn fetch_catalog(&self, _url: &str) -> Result<Vec<Item>> {
        self.fetches.set(self.fetches.get() + 1);
        Ok(self.items.clone())
    }

    fn download_asset(&self, url: &str, destination: &Path) -> Result<()> {
        if self.failing.iter().any(|u| u == url) {
            return Err(PipelineError::fetch(url, "connection reset by peer"));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, IMAGE_BYTES)?;
        self.downloads.borrow_mut().push(url.to_string());
        Ok(())
    }
}

/// Replies with a fixed model answer, run through the real response parser.
pub struct FakeAnnotator {
    reply: String,
    failing: Vec<String>,
    calls: RefCell<Vec<(PathBuf, Option<ArticleContext>)>>,
}

impl FakeAnnotator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            failing: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Fails for images with this file name.
    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.failing.push(file_name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(PathBuf, Option<ArticleContext>)> {
        self.calls.borrow().clone()
    }
}

impl ImageAnnotator for FakeAnnotator {
    fn analyze(&self, image: &Path, context: Option<&ArticleContext>) -> Result<Annotation> {
        self.calls
            .borrow_mut()
            .push((image.to_path_buf(), context.cloned()));

        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(PipelineError::Analysis("HTTP 500: model crashed".to_string()));
        }

        Ok(annotation::parse_response(&self.reply))
    }
}

/// One-shot HTTP server on a loopback port answering with a canned response.
pub struct CannedServer {
    pub url: String,
    handle: JoinHandle<io::Result<String>>,
}

impl CannedServer {
    pub fn respond(status: u16, body: impl Into<Vec<u8>>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}", listener.local_addr()?);
        let body = body.into();

        let handle = thread::spawn(move || -> io::Result<String> {
            let (mut stream, _) = listener.accept()?;
            let request = read_request(&mut BufReader::new(&stream))?;

            let head = format!(
                "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            stream.write_all(head.as_bytes())?;
            stream.write_all(&body)?;
            stream.flush()?;
            Ok(request)
        });

        Ok(Self { url, handle })
    }

    /// Waits for the exchange and returns the raw request the server saw.
    pub fn request(self) -> io::Result<String> {
        self.handle
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "server thread panicked"))?
    }
}

fn read_request(reader: &mut impl BufRead) -> io::Result<String> {
    let mut request = String::new();
    let mut content_length = 0;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
        request.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;
    request.push_str(&String::from_utf8_lossy(&body));
    Ok(request)
}
