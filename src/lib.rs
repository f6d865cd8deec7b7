//! akniga-dl - A Rust CLI tool for downloading audiobooks from akniga.org
//!
//! This library drives a headless browser to capture the site's internal API traffic,
//! recovers the book metadata and audio source from it, and turns the audio into
//! tagged per-chapter MP3 files using ffmpeg.

pub mod analysis;
pub mod archive;
pub mod book;
pub mod capture;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod media;
pub mod pipeline;
pub mod utils;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use analysis::{AudioSource, BookRequest, SegmentPattern};
pub use book::{Book, Chapter, Series};
pub use capture::{CapturedExchange, CapturedPage, NetworkCapture};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use media::{MediaJob, MediaProcessor};
pub use pipeline::{BookDownloader, DownloadedBook};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the downloader
#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("Book data not found: expected exactly one book data request, found {found}")]
    MetadataNotFound { found: usize },

    #[error("Invalid book data: {0}")]
    InvalidMetadata(String),

    #[error("Audio source not found: no manifest, audio tag or segment pattern on the page")]
    SourceNotFound,

    #[error("Chapter '{0}' has no segment file index")]
    MissingSegmentIndex(String),

    #[error("Segment download failed: HTTP {status} for {url}")]
    SegmentFetchFailed { url: String, status: u16 },

    #[error("Cover download failed for {0}")]
    CoverFetchFailed(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalToolFailure {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
}
