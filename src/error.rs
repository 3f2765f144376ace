use thiserror::Error;

/// Errors raised by the pipeline stages and their collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request to {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("could not parse catalog: {0}")]
    Parse(String),

    #[error("catalog load failed: {0}")]
    Load(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("image analysis failed: {0}")]
    Analysis(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
