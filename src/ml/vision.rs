use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::ml::annotation::{self, Annotation, ArticleContext};

pub const DEFAULT_MODEL: &str = "gemma-3-4b-it";

const TEMPERATURE: f32 = 0.3;

/// Produces multilingual descriptions for a product image.
pub trait ImageAnnotator {
    fn analyze(&self, image: &Path, context: Option<&ArticleContext>) -> Result<Annotation>;
}

/// Client for an OpenAI-compatible chat-completion backend (e.g. LM Studio).
pub struct VisionClient {
    http: Client,
    base_url: String,
    model: String,
}

impl VisionClient {
    pub fn new(base_url: &str, model: &str, timeout: Option<Duration>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

impl ImageAnnotator for VisionClient {
    fn analyze(&self, image: &Path, context: Option<&ArticleContext>) -> Result<Annotation> {
        let data_uri = encode_image(image)?;
        let request = ChatRequest::new(&self.model, build_prompt(context), data_uri);

        let url = self.endpoint();
        debug!("Sending {:?} to {}", image, url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| PipelineError::Analysis(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::Analysis(format!("HTTP {}: {}", status, body)));
        }

        let reply: ChatResponse = response
            .json()
            .map_err(|e| PipelineError::Analysis(format!("malformed response: {}", e)))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::Analysis("response has no choices".to_string()))?;

        Ok(annotation::parse_response(&content))
    }
}

/// MIME type from the file extension, JPEG when unknown.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

pub fn encode_image(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("data:{};base64,{}", mime_type(path), STANDARD.encode(bytes)))
}

pub fn build_prompt(context: Option<&ArticleContext>) -> String {
    let mut prompt = String::from(
        "Start by checking the image for a red 'LIQUIDATION' stamp or text. \
         If it is there, answer with exactly this and nothing else: \
         EN: LIQUIDATION FR: LIQUIDATION DE: LIQUIDATION\n\n",
    );

    match context {
        Some(ctx) => {
            prompt.push_str(&format!(
                "If there is no stamp, describe the product in the image. Known details:\n\
                 - Product ID: {}\n\
                 - Description: {}\n\n\
                 Only describe that one product. Give one line per language, as a \
                 comma-separated list of keywords (colors, materials, brand, model \
                 numbers, distinguishing features), no full sentences:\n\
                 EN: <English keywords>\n\
                 FR: <the same keywords in French>\n\
                 DE: <the same keywords in German>\n\n\
                 Stick to what is visible and avoid opinions.",
                ctx.id,
                ctx.description.as_deref().unwrap_or("No description available"),
            ));
        }
        None => {
            prompt.push_str(
                "If there is no stamp, describe the main product in the image. \
                 Give one short line per language without filler words:\n\
                 EN: <English description>\n\
                 FR: <French translation>\n\
                 DE: <German translation>",
            );
        }
    }

    prompt
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    /// -1 asks the backend for no output cap.
    max_tokens: i32,
    stream: bool,
}

impl ChatRequest {
    fn new(model: &str, prompt: String, data_uri: String) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                ],
            }],
            temperature: TEMPERATURE,
            max_tokens: -1,
            stream: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}
