use anyhow::Context;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::book::Book;
use crate::config::SiteConfig;
use crate::fetch::download_to_file;
use crate::utils::sanitize_filename;
use crate::{DownloadError, Result};

const COVER_FILE_NAME: &str = "cover.jpg";

/// Destination directory of a book plus its transient working directory.
///
/// The working directory lives inside the book directory and is removed when the
/// workspace is dropped, whether the run succeeded or not.
pub struct Workspace {
    book_dir: PathBuf,
    work_dir: TempDir,
    cover: Option<PathBuf>,
}

impl Workspace {
    /// `output/author/[series/]title`
    pub fn book_dir_for(output_root: &Path, book: &Book) -> PathBuf {
        let mut dir = output_root.join(&book.author);
        if let Some(series) = &book.series {
            dir.push(sanitize_filename(&series.name));
        }
        dir.push(&book.title_only);
        dir
    }

    /// Create the directory tree for `book` below `output_root`
    pub fn prepare(output_root: &Path, book: &Book) -> Result<Self> {
        let book_dir = Self::book_dir_for(output_root, book);
        fs_err::create_dir_all(&book_dir)?;

        let work_dir = tempfile::Builder::new()
            .prefix(".work-")
            .tempdir_in(&book_dir)
            .with_context(|| format!("Failed to create working directory in {}", book_dir.display()))?;

        tracing::debug!("Working directory: {}", work_dir.path().display());

        Ok(Self {
            book_dir,
            work_dir,
            cover: None,
        })
    }

    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Cover image, if one was downloaded and is still on disk
    pub fn cover(&self) -> Option<&Path> {
        self.cover.as_deref().filter(|path| path.exists())
    }

    /// Download the cover art; failure only costs the embedded image
    pub async fn fetch_cover(&mut self, client: &Client, book: &Book, site: &SiteConfig) {
        let Some(preview) = book.preview.as_deref() else {
            tracing::warn!("Book has no preview image, chapters will have no cover");
            return;
        };

        let dest = self.work_dir.path().join(COVER_FILE_NAME);
        match download_cover(client, preview, site, &dest).await {
            Ok(()) => self.cover = Some(dest),
            Err(e) => tracing::warn!("{}; continuing without cover", e),
        }
    }
}

/// Try the large cover variant, then the preview itself
pub async fn download_cover(
    client: &Client,
    preview: &str,
    site: &SiteConfig,
    dest: &Path,
) -> std::result::Result<(), DownloadError> {
    let large = preview.replace(&site.cover_thumbnail_marker, &site.cover_large_marker);

    for url in [large.as_str(), preview] {
        match download_to_file(client, url, dest, None).await {
            Ok(status) if status == reqwest::StatusCode::OK => {
                tracing::debug!("Cover downloaded from {}", url);
                return Ok(());
            }
            Ok(status) => tracing::debug!("Cover variant {} returned HTTP {}", url, status),
            Err(e) => tracing::debug!("Cover variant {} failed: {}", url, e),
        }
    }

    Err(DownloadError::CoverFetchFailed(preview.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Series;
    use crate::config::Config;
    use crate::test_support::{spawn_server, Route};

    fn book(series: Option<Series>, preview: Option<String>) -> Book {
        Book {
            id: None,
            title: "Test_Book".to_string(),
            title_only: "Test Book".to_string(),
            author: "A_B".to_string(),
            preview,
            series,
            chapters: Vec::new(),
        }
    }

    #[test]
    fn test_book_dir_layout() {
        let root = Path::new("/out");
        assert_eq!(
            Workspace::book_dir_for(root, &book(None, None)),
            PathBuf::from("/out/A_B/Test Book")
        );

        let series = Series { name: "Saga: One".to_string(), number: Some(1) };
        assert_eq!(
            Workspace::book_dir_for(root, &book(Some(series), None)),
            PathBuf::from("/out/A_B/Saga_ One/Test Book")
        );
    }

    #[test]
    fn test_prepare_is_idempotent_and_cleans_work_dir() {
        let out = tempfile::tempdir().unwrap();
        let book = book(None, None);

        let first = Workspace::prepare(out.path(), &book).unwrap();
        let work = first.work_dir().to_path_buf();
        assert!(work.exists());

        let second = Workspace::prepare(out.path(), &book).unwrap();
        assert_eq!(first.book_dir(), second.book_dir());

        drop(first);
        assert!(!work.exists());
        assert!(second.book_dir().exists());
    }

    #[tokio::test]
    async fn test_cover_prefers_large_variant() {
        let server = spawn_server(vec![
            Route::ok("/400x/c.jpg", b"large".to_vec()),
            Route::ok("/100x100crop/c.jpg", b"small".to_vec()),
        ]);
        let out = tempfile::tempdir().unwrap();
        let mut ws = Workspace::prepare(out.path(), &book(None, None)).unwrap();

        ws.fetch_cover(&Client::new(), &book(None, ws_preview(&server)), &Config::default().site).await;

        let cover = ws.cover().unwrap();
        assert_eq!(std::fs::read(cover).unwrap(), b"large");
        assert_eq!(server.hits("/100x100crop/c.jpg"), 0);
    }

    #[tokio::test]
    async fn test_cover_falls_back_to_preview() {
        let server = spawn_server(vec![Route::ok("/100x100crop/c.jpg", b"small".to_vec())]);
        let out = tempfile::tempdir().unwrap();
        let mut ws = Workspace::prepare(out.path(), &book(None, None)).unwrap();

        ws.fetch_cover(&Client::new(), &book(None, ws_preview(&server)), &Config::default().site).await;

        assert_eq!(std::fs::read(ws.cover().unwrap()).unwrap(), b"small");
        assert_eq!(server.hits("/400x/c.jpg"), 1);
    }

    #[tokio::test]
    async fn test_cover_failure_is_not_fatal() {
        let server = spawn_server(Vec::new());
        let out = tempfile::tempdir().unwrap();
        let mut ws = Workspace::prepare(out.path(), &book(None, None)).unwrap();

        ws.fetch_cover(&Client::new(), &book(None, ws_preview(&server)), &Config::default().site).await;

        assert!(ws.cover().is_none());
    }

    fn ws_preview(server: &crate::test_support::TestServer) -> Option<String> {
        Some(format!("{}/100x100crop/c.jpg", server.base_url))
    }
}
