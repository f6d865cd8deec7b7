use std::collections::HashSet;
use std::path::PathBuf;

use super::acquire::AcquiredAudio;
use crate::book::Book;
use crate::media::{MediaJob, MediaProcessor, TimeRange};
use crate::utils::sanitize_filename;
use crate::workspace::Workspace;
use crate::Result;

/// Cut, tag and store every chapter in list order.
///
/// Returns the chapter files in the same order as `book.chapters`.
pub async fn materialize_chapters(
    book: &Book,
    audio: &AcquiredAudio,
    workspace: &Workspace,
    processor: &dyn MediaProcessor,
) -> Result<Vec<PathBuf>> {
    let mut used_names = HashSet::new();
    let mut files = Vec::with_capacity(book.chapters.len());

    for (position, chapter) in book.chapters.iter().enumerate() {
        let source = audio.source_for(chapter)?;
        let name = unique_name(&mut used_names, &sanitize_filename(&chapter.title));

        let untagged = workspace
            .work_dir()
            .join(format!("{:04}_no_meta.mp3", position));
        let chapter_path = workspace.book_dir().join(format!("{}.mp3", name));

        tracing::info!(
            "Chapter {}/{}: {}",
            position + 1,
            book.chapters.len(),
            chapter.title
        );

        let range = TimeRange {
            start: chapter.time_from_start,
            end: chapter.time_finish,
        };
        processor
            .process(&MediaJob::cut(source, range, &untagged))
            .await?;

        let tags = vec![
            ("title".to_string(), chapter.title.clone()),
            ("album".to_string(), book.title_only.clone()),
            ("artist".to_string(), book.author.clone()),
        ];
        processor
            .process(&MediaJob::tag(&untagged, workspace.cover(), tags, &chapter_path))
            .await?;

        fs_err::remove_file(&untagged)?;
        files.push(chapter_path);
    }

    Ok(files)
}

/// `name`, or `name (2)`, `name (3)`... when an earlier chapter already took it
fn unique_name(used: &mut HashSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut counter = 2;
    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{} ({})", name, counter);
        counter += 1;
    }
    candidate
}
