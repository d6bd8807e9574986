//! MOBI output: write the EPUB, hand it to an external converter, remove the EPUB.
//!
//! Converters such as kindlegen report a failing status even when the `.mobi` was produced,
//! so their exit status is only logged. Removing the intermediate EPUB is what must succeed.

use crate::epub::{write_epub, EpubError};
use crate::model::Chapter;
use crate::scraper::Fetcher;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MobiError {
    #[error(transparent)]
    Epub(#[from] EpubError),

    #[error("Failed to remove intermediate EPUB {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `path` with a `.mobi` extension, and the intermediate `.epub` next to it.
pub fn mobi_paths(path: &Path) -> (PathBuf, PathBuf) {
    let mobi = if path.extension().is_some_and(|e| e == "mobi") {
        path.to_path_buf()
    } else {
        let mut s = path.as_os_str().to_owned();
        s.push(".mobi");
        PathBuf::from(s)
    };
    let epub = mobi.with_extension("epub");
    (mobi, epub)
}

/// Render `root` to `path` (forced to `.mobi`) through `converter`. Returns the MOBI path.
pub fn write_mobi<F: Fetcher + ?Sized>(
    root: &Chapter,
    fetcher: &F,
    path: &Path,
    converter: &str,
    ncx: bool,
) -> Result<PathBuf, MobiError> {
    let (mobi, epub) = mobi_paths(path);
    write_epub(root, fetcher, &epub, ncx)?;

    match std::process::Command::new(converter).arg(&epub).output() {
        Ok(output) if output.status.success() => {
            debug!(converter, "converter finished");
        }
        Ok(output) => {
            debug!(
                converter,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "converter reported failure, ignoring status"
            );
        }
        Err(e) => {
            warn!(converter, error = %e, "could not run converter. Is it installed and on PATH?");
        }
    }

    std::fs::remove_file(&epub).map_err(|e| MobiError::Cleanup {
        path: epub.clone(),
        source: e,
    })?;
    if mobi.exists() {
        info!(path = %mobi.display(), "mobi saved");
    } else {
        warn!(path = %mobi.display(), "converter did not produce a mobi file");
    }
    Ok(mobi)
}
