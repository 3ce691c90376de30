use std::fs::{self, File};
use std::path::Path;

use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Extract the downloaded archive in `dir` and leave the table file behind
/// under `dbf_name`.
///
/// The archive is expected to hold the table as its first entry; entry order
/// is trusted, matching the upstream dataset layout, and a second entry only
/// gets a warning. After extraction the archive itself is deleted and the
/// first entry is renamed to the canonical table filename.
pub fn extract_table(dir: &Path, archive_name: &str, dbf_name: &str) -> Result<()> {
    let archive_path = dir.join(archive_name);
    let file = File::open(&archive_path)
        .map_err(|e| Error::UnzipFailure(zip::result::ZipError::Io(e)))?;
    let mut archive = ZipArchive::new(file).map_err(Error::UnzipFailure)?;

    if archive.len() > 1 {
        warn!(entries = archive.len(), "archive has more than one entry; using the first");
    }
    let first = archive
        .by_index(0)
        .map_err(Error::UnzipFailure)?
        .name()
        .to_string();
    archive.extract(dir).map_err(Error::UnzipFailure)?;
    drop(archive);

    fs::remove_file(&archive_path)?;
    fs::rename(dir.join(&first), dir.join(dbf_name))?;
    info!(entry = %first, dbf = %dbf_name, "extracted table file");
    Ok(())
}
