//! Zip packaging of a finished book.

use anyhow::Context;
use fs_err::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use crate::Result;

/// Archive path for a book page: `<output>/<slug>.zip`
pub fn archive_path(output_root: &Path, slug: &str) -> PathBuf {
    output_root.join(format!("{}.zip", slug))
}

/// Zip `book_dir` into `out_zip`, entries relative to `output_root`
/// (`author/[series/]title/<chapter>.mp3`).
pub fn archive_book(output_root: &Path, book_dir: &Path, out_zip: &Path) -> Result<()> {
    let prefix = book_dir
        .strip_prefix(output_root)
        .with_context(|| format!("{} is not below {}", book_dir.display(), output_root.display()))?;

    let file = File::create(out_zip)?;
    let mut zip = zip::ZipWriter::new(file);

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for ancestor in prefix.ancestors().collect::<Vec<_>>().into_iter().rev() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        zip.add_directory(zip_name(ancestor), options)
            .with_context(|| format!("zip add_directory: {}", ancestor.display()))?;
    }

    let result = add_dir_recursive(&mut zip, book_dir, prefix, options);
    if let Err(e) = result {
        drop(zip);
        let _ = fs_err::remove_file(out_zip);
        return Err(e);
    }

    zip.finish().context("zip finish")?;
    tracing::debug!("Archived {} into {}", book_dir.display(), out_zip.display());
    Ok(())
}

/// Remove the book directory and any parents it leaves empty, up to `output_root`
pub fn remove_book_dir(output_root: &Path, book_dir: &Path) -> Result<()> {
    fs_err::remove_dir_all(book_dir)?;

    let mut current = book_dir.parent();
    while let Some(dir) = current {
        if dir == output_root || !dir.starts_with(output_root) {
            break;
        }
        let is_empty = fs_err::read_dir(dir)?.next().is_none();
        if !is_empty {
            break;
        }
        fs_err::remove_dir(dir)?;
        current = dir.parent();
    }

    Ok(())
}

fn add_dir_recursive<W: Write + Seek>(
    zip: &mut zip::ZipWriter<W>,
    dir: &Path,
    zip_prefix: &Path,
    options: zip::write::SimpleFileOptions,
) -> Result<()> {
    let mut entries = fs_err::read_dir(dir)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("list dir: {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let zip_path = zip_prefix.join(entry.file_name());

        let file_type = entry.file_type().context("read file type")?;
        if file_type.is_dir() {
            zip.add_directory(zip_name(&zip_path), options)
                .with_context(|| format!("zip add_directory: {}", zip_path.display()))?;
            add_dir_recursive(zip, &path, &zip_path, options)?;
            continue;
        }

        if !file_type.is_file() {
            continue;
        }

        zip.start_file(zip_name(&zip_path), options)
            .with_context(|| format!("zip start_file: {}", zip_path.display()))?;
        let mut f = File::open(&path)?;
        io::copy(&mut f, zip).with_context(|| format!("zip write: {}", path.display()))?;
    }

    Ok(())
}

/// Zip entry names always use `/`
fn zip_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
