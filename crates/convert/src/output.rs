//! Naming and placement of hop outputs.
//!
//! Engines write into a hidden staging file next to the source. Only once
//! that file is verified does it take the source's place: a free name
//! `<stem>.<ext>` (or `<stem>_<n>.<ext>`) is reserved with an exclusive
//! create, the staging file is renamed onto it, then the source is removed.
//! At no point is a file that already exists overwritten, except the source
//! itself when the new name happens to be the old one.

use crate::error::{ErrorKind, Result};
use conveyor_format::{FormatCode, catalogue};
use conveyor_registry::FileId;
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};

/// Suffixes tried before giving up on finding a free name.
const MAX_SUFFIX: usize = 1000;

fn stem(path: &Path) -> String {
    path.file_stem().map_or_else(|| "file".to_string(), |s| s.to_string_lossy().into_owned())
}

fn parent(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

/// Hidden file the engine writes the hop's result to.
pub fn staging_path(source: &Path, file: FileId, to: &FormatCode) -> PathBuf {
    let name = format!(".{}.{}.{}", stem(source), file.simple(), catalogue::extension_for(to));
    parent(source).join(name)
}

/// Moves a verified staging file into its final place and removes `source`.
///
/// Returns the path the file now lives at.
pub async fn place(source: &Path, staging: &Path, to: &FormatCode) -> Result<PathBuf> {
    let placed = claim(staging, parent(source), &stem(source), to, Some(source)).await?;
    if placed != source {
        match fs::remove_file(source).await {
            Ok(()) => {},
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => tracing::warn!(path = %source.display(), error = %e, "Could not remove converted source"),
        }
    }
    Ok(placed)
}

/// Moves a verified staging file to a free `<stem>.<ext>` name in `dir`.
pub async fn publish(staging: &Path, dir: &Path, stem: &str, to: &FormatCode) -> Result<PathBuf> {
    claim(staging, dir, stem, to, None).await
}

async fn claim(staging: &Path, dir: &Path, stem: &str, to: &FormatCode, replaces: Option<&Path>) -> Result<PathBuf> {
    let extension = catalogue::extension_for(to);
    for n in 0..MAX_SUFFIX {
        let candidate = match n {
            0 => dir.join(format!("{stem}.{extension}")),
            n => dir.join(format!("{stem}_{n}.{extension}")),
        };
        if replaces == Some(candidate.as_path()) {
            fs::rename(staging, &candidate).await.or_raise(|| ErrorKind::Io)?;
            return Ok(candidate);
        }
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(_) => {},
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
        }
        if let Err(e) = fs::rename(staging, &candidate).await {
            let _ = fs::remove_file(&candidate).await;
            return Err(e).or_raise(|| ErrorKind::Io);
        }
        return Ok(candidate);
    }
    exn::bail!(ErrorKind::NameExhausted(dir.join(stem)))
}

/// Removes a staging file, if there is one.
pub async fn discard(staging: &Path) {
    match fs::remove_file(staging).await {
        Ok(()) => tracing::trace!(path = %staging.display(), "Staging file discarded"),
        Err(e) if e.kind() == IoErrorKind::NotFound => {},
        Err(e) => tracing::warn!(path = %staging.display(), error = %e, "Could not remove staging file"),
    }
}
