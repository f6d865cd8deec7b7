use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::analysis::{AudioSource, SegmentPattern};
use crate::book::{Book, Chapter};
use crate::fetch::download_to_file;
use crate::media::{MediaJob, MediaProcessor};
use crate::{DownloadError, Result};

/// Audio available on disk for cutting chapters
#[derive(Debug, Clone, PartialEq)]
pub enum AcquiredAudio {
    /// The whole book in one file
    Continuous(PathBuf),

    /// Downloaded segment files by index
    Segments(HashMap<u32, PathBuf>),
}

impl AcquiredAudio {
    /// File the chapter has to be cut from
    pub fn source_for(&self, chapter: &Chapter) -> Result<&Path> {
        match self {
            AcquiredAudio::Continuous(path) => Ok(path),
            AcquiredAudio::Segments(segments) => {
                let index = chapter
                    .file
                    .ok_or_else(|| DownloadError::MissingSegmentIndex(chapter.title.clone()))?;
                segments
                    .get(&index)
                    .map(PathBuf::as_path)
                    .ok_or_else(|| anyhow::anyhow!("Segment {:02} was not downloaded", index))
            }
        }
    }
}

/// Fetch the book's audio into `work_dir`
pub async fn acquire_audio(
    source: &AudioSource,
    book: &Book,
    work_dir: &Path,
    client: &Client,
    processor: &dyn MediaProcessor,
    quiet: bool,
) -> Result<AcquiredAudio> {
    match source {
        AudioSource::Manifest(url) | AudioSource::DirectUrl(url) => {
            let output = work_dir.join(format!("{}.mp3", book.title));
            fetch_continuous(url, &output, processor, quiet).await?;
            Ok(AcquiredAudio::Continuous(output))
        }
        AudioSource::Segmented(pattern) => {
            tracing::info!("Book is split into {} segment files", book.segment_indices().len());
            let segments = fetch_segments(pattern, &book.chapters, work_dir, client, quiet).await?;
            Ok(AcquiredAudio::Segments(segments))
        }
    }
}

async fn fetch_continuous(
    url: &str,
    output: &Path,
    processor: &dyn MediaProcessor,
    quiet: bool,
) -> Result<()> {
    tracing::info!("Downloading full audio to: {}", output.display());

    let progress = spinner(quiet);
    progress.set_message(format!("Downloading audio with {}...", processor.tool_name()));

    processor.process(&MediaJob::fetch_stream(url, output)).await?;

    progress.finish_with_message("Download complete");
    Ok(())
}

/// Download every segment the chapters reference, each index once, in chapter order
async fn fetch_segments(
    pattern: &SegmentPattern,
    chapters: &[Chapter],
    work_dir: &Path,
    client: &Client,
    quiet: bool,
) -> Result<HashMap<u32, PathBuf>> {
    let mut segments = HashMap::new();

    for chapter in chapters {
        let index = chapter
            .file
            .ok_or_else(|| DownloadError::MissingSegmentIndex(chapter.title.clone()))?;
        if segments.contains_key(&index) {
            continue;
        }

        let url = pattern.url(index);
        let dest = work_dir.join(pattern.local_file_name(index));
        tracing::info!("Downloading segment {}", pattern.file_name(index));

        let progress = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        };
        progress.set_message(pattern.file_name(index));

        let status = download_to_file(client, &url, &dest, Some(&progress)).await?;
        if status != StatusCode::OK {
            progress.abandon();
            return Err(DownloadError::SegmentFetchFailed {
                url,
                status: status.as_u16(),
            }
            .into());
        }

        progress.finish_with_message(format!("{} complete", pattern.file_name(index)));
        segments.insert(index, dest);
    }

    Ok(segments)
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(std::time::Duration::from_millis(120));
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_server, RecordingProcessor, Route};

    fn chapter(title: &str, file: Option<u32>) -> Chapter {
        Chapter {
            title: title.to_string(),
            time_from_start: 0.0,
            time_finish: 10.0,
            file,
        }
    }

    fn pattern(base_url: &str) -> SegmentPattern {
        SegmentPattern {
            base_url: format!("{}/b/", base_url),
            suffix: ".some.mp3".to_string(),
            query: None,
        }
    }

    #[tokio::test]
    async fn test_each_segment_is_fetched_once() {
        let server = spawn_server(vec![
            Route::ok("/b/05.some.mp3", b"five".to_vec()),
            Route::ok("/b/06.some.mp3", b"six".to_vec()),
        ]);
        let work = tempfile::tempdir().unwrap();
        let chapters = vec![
            chapter("a", Some(5)),
            chapter("b", Some(5)),
            chapter("c", Some(6)),
            chapter("d", Some(5)),
        ];

        let segments = fetch_segments(&pattern(&server.base_url), &chapters, work.path(), &Client::new(), true)
            .await
            .unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(server.hits("/b/05.some.mp3"), 1);
        assert_eq!(server.hits("/b/06.some.mp3"), 1);
        assert_eq!(std::fs::read(&segments[&6]).unwrap(), b"six");
    }

    #[tokio::test]
    async fn test_segment_http_error_is_fatal() {
        let server = spawn_server(vec![
            Route::ok("/b/01.some.mp3", b"one".to_vec()),
            Route::status("/b/02.some.mp3", 403),
        ]);
        let work = tempfile::tempdir().unwrap();
        let chapters = vec![chapter("a", Some(1)), chapter("b", Some(2))];

        let err = fetch_segments(&pattern(&server.base_url), &chapters, work.path(), &Client::new(), true)
            .await
            .unwrap_err();

        match err.downcast_ref::<DownloadError>() {
            Some(DownloadError::SegmentFetchFailed { status, url }) => {
                assert_eq!(*status, 403);
                assert!(url.ends_with("/b/02.some.mp3"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chapter_without_index_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let chapters = vec![chapter("lonely", None)];

        let err = fetch_segments(&pattern("http://127.0.0.1:9"), &chapters, work.path(), &Client::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::MissingSegmentIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_manifest_is_fetched_by_processor() {
        let work = tempfile::tempdir().unwrap();
        let processor = RecordingProcessor::default();
        let book = Book {
            id: None,
            title: "Test_Book".to_string(),
            title_only: "Test Book".to_string(),
            author: "A_B".to_string(),
            preview: None,
            series: None,
            chapters: vec![chapter("a", None)],
        };

        let audio = acquire_audio(
            &AudioSource::Manifest("https://s.example/p.m3u8".to_string()),
            &book,
            work.path(),
            &Client::new(),
            &processor,
            true,
        )
        .await
        .unwrap();

        let expected = work.path().join("Test_Book.mp3");
        assert_eq!(audio, AcquiredAudio::Continuous(expected.clone()));
        assert_eq!(audio.source_for(&book.chapters[0]).unwrap(), expected.as_path());

        let jobs = processor.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].input, "https://s.example/p.m3u8");
    }
}
