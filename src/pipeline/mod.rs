use anyhow::Context;
use reqwest::Client;
use std::path::{Path, PathBuf};
use url::Url;

use crate::analysis::{analyse_book_page, parse_series_listing};
use crate::book::Book;
use crate::capture::{ChromeCapture, NetworkCapture};
use crate::config::Config;
use crate::fetch::{build_client, fetch_text};
use crate::media::{Ffmpeg, MediaProcessor};
use crate::utils::{is_series_url, url_slug, validate_book_url};
use crate::workspace::Workspace;
use crate::{archive, Result};

pub mod acquire;
pub mod chapters;

use acquire::acquire_audio;
use chapters::materialize_chapters;

/// Outcome of downloading one book
#[derive(Debug, Clone)]
pub struct DownloadedBook {
    /// Page the book was downloaded from
    pub url: String,

    /// Book metadata; `None` when an existing archive was reused
    pub book: Option<Book>,

    /// Directory holding the chapter files (removed again when archived)
    pub book_dir: Option<PathBuf>,

    /// Chapter files in chapter order
    pub chapter_files: Vec<PathBuf>,

    /// Zip archive, when archiving was requested
    pub archive: Option<PathBuf>,
}

/// Main download pipeline: capture, analyse, prepare, acquire, materialize
pub struct BookDownloader {
    config: Config,
    capture: Box<dyn NetworkCapture>,
    processor: Box<dyn MediaProcessor>,
    client: Client,
    quiet: bool,
}

impl BookDownloader {
    /// Create a downloader using Chrome for capture and ffmpeg for media
    pub fn new(config: Config) -> Result<Self> {
        let capture = Box::new(ChromeCapture::new(config.browser.clone()));
        let processor = Box::new(Ffmpeg::new(config.media.ffmpeg_path.clone()));
        Self::with_components(config, capture, processor)
    }

    /// Create a downloader with explicit collaborators
    pub fn with_components(
        config: Config,
        capture: Box<dyn NetworkCapture>,
        processor: Box<dyn MediaProcessor>,
    ) -> Result<Self> {
        let client = build_client(&config.app.user_agent)?;

        Ok(Self {
            config,
            capture,
            processor,
            client,
            quiet: false,
        })
    }

    /// Hide progress indicators
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Download the book (or every book of the series) at `url`
    pub async fn download(&self, url: &str, output_root: &Path, archive: bool) -> Result<Vec<DownloadedBook>> {
        let book_urls = self.book_urls(url).await?;
        let mut downloaded = Vec::with_capacity(book_urls.len());

        for (position, book_url) in book_urls.iter().enumerate() {
            if book_urls.len() > 1 {
                tracing::info!("Book {}/{}: {}", position + 1, book_urls.len(), book_url);
            }

            let book = if archive {
                self.download_book_archive(book_url, output_root).await?
            } else {
                self.download_book(book_url, output_root).await?
            };
            downloaded.push(book);
        }

        Ok(downloaded)
    }

    /// Book page URLs behind `url`: the URL itself, or every book of a series listing
    pub async fn book_urls(&self, url: &str) -> Result<Vec<String>> {
        let site_host = self.config.site_host();
        let parsed = validate_book_url(url, site_host.as_deref())?;

        if !is_series_url(&parsed) {
            return Ok(vec![parsed.to_string()]);
        }

        tracing::info!("Fetching series listing: {}", parsed);
        let html = fetch_text(&self.client, parsed.as_str()).await?;
        let links = parse_series_listing(&html, &parsed, &self.config.site.series_book_link_selector);
        if links.is_empty() {
            anyhow::bail!("No books found on series page {}", parsed);
        }

        tracing::info!("Series has {} books", links.len());
        Ok(links)
    }

    /// Run the whole pipeline for a single book page
    pub async fn download_book(&self, url: &str, output_root: &Path) -> Result<DownloadedBook> {
        fs_err::create_dir_all(output_root)?;

        let page = self
            .capture
            .capture(url)
            .await
            .with_context(|| format!("{} capture failed for {}", self.capture.backend_name(), url))?;
        let request = analyse_book_page(&page, &self.config.site)?;
        let book = request.book;

        tracing::info!("Book: {} - {} ({} chapters)", book.author, book.title_only, book.chapters.len());

        let mut workspace = Workspace::prepare(output_root, &book)?;
        workspace.fetch_cover(&self.client, &book, &self.config.site).await;

        let audio = acquire_audio(
            &request.source,
            &book,
            workspace.work_dir(),
            &self.client,
            self.processor.as_ref(),
            self.quiet,
        )
        .await?;

        let chapter_files = materialize_chapters(&book, &audio, &workspace, self.processor.as_ref()).await?;

        let book_dir = workspace.book_dir().to_path_buf();
        drop(workspace);

        tracing::info!("The book has been downloaded: {}", book_dir.display());

        Ok(DownloadedBook {
            url: request.page_url,
            book: Some(book),
            book_dir: Some(book_dir),
            chapter_files,
            archive: None,
        })
    }

    /// Download a book and pack it into `<output>/<slug>.zip`, reusing an existing archive
    pub async fn download_book_archive(&self, url: &str, output_root: &Path) -> Result<DownloadedBook> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let slug = url_slug(&parsed).unwrap_or_else(|| "book".to_string());
        let zip_path = archive::archive_path(output_root, &slug);

        if zip_path.exists() {
            tracing::info!("Archive already exists, skipping download: {}", zip_path.display());
            return Ok(DownloadedBook {
                url: url.to_string(),
                book: None,
                book_dir: None,
                chapter_files: Vec::new(),
                archive: Some(zip_path),
            });
        }

        let mut downloaded = self.download_book(url, output_root).await?;
        if let Some(book_dir) = &downloaded.book_dir {
            archive::archive_book(output_root, book_dir, &zip_path)?;
            archive::remove_book_dir(output_root, book_dir)?;
        }

        tracing::info!("Archive created: {}", zip_path.display());
        downloaded.archive = Some(zip_path);
        Ok(downloaded)
    }
}
