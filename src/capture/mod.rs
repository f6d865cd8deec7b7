use async_trait::async_trait;
use std::io::Read;

pub mod chrome;

pub use chrome::ChromeCapture;

use crate::Result;

/// One HTTP(S) exchange the page triggered while loading
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    /// HTTP method (upper case)
    pub method: String,

    /// Full request URL
    pub url: String,

    /// Path component of the URL
    pub path: String,

    /// Response, if one arrived
    pub response: Option<CapturedResponse>,
}

#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: u16,

    /// Value of the Content-Encoding header the body is still encoded with
    pub content_encoding: Option<String>,

    /// Response body, if it was retained
    pub body: Option<Vec<u8>>,
}

/// Everything a page load produced
#[derive(Debug, Clone, Default)]
pub struct CapturedPage {
    /// URL the browser was pointed at
    pub url: String,

    /// Exchanges in the order the requests were issued
    pub exchanges: Vec<CapturedExchange>,

    /// Rendered HTML after the page finished loading
    pub html: String,
}

impl CapturedExchange {
    pub fn new(method: &str, url: &str) -> Self {
        let path = url::Url::parse(url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_default();

        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            path,
            response: None,
        }
    }

    pub fn with_response(mut self, response: CapturedResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Response body with the content encoding removed
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No response captured for {}", self.url))?;
        let body = response
            .body
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No response body captured for {}", self.url))?;

        decode_body(body, response.content_encoding.as_deref())
    }
}

/// Undo a Content-Encoding
pub fn decode_body(body: &[u8], encoding: Option<&str>) -> Result<Vec<u8>> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    let mut decoded = Vec::new();

    match encoding.as_deref() {
        None | Some("") | Some("identity") => return Ok(body.to_vec()),
        Some("br") => {
            brotli::Decompressor::new(body, 4096)
                .read_to_end(&mut decoded)
                .map_err(|e| anyhow::anyhow!("Failed to decompress brotli body: {}", e))?;
        }
        Some("gzip") | Some("x-gzip") => {
            flate2::read::GzDecoder::new(body)
                .read_to_end(&mut decoded)
                .map_err(|e| anyhow::anyhow!("Failed to decompress gzip body: {}", e))?;
        }
        Some("deflate") => {
            flate2::read::ZlibDecoder::new(body)
                .read_to_end(&mut decoded)
                .map_err(|e| anyhow::anyhow!("Failed to decompress deflate body: {}", e))?;
        }
        Some(other) => anyhow::bail!("Unsupported content encoding: {}", other),
    }

    Ok(decoded)
}

/// Trait for loading a page and recording the traffic it causes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkCapture: Send + Sync {
    /// Load the page and return every exchange plus the final HTML
    async fn capture(&self, url: &str) -> Result<CapturedPage>;

    /// Name of the capture backend
    fn backend_name(&self) -> &'static str;
}
