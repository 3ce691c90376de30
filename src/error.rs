use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the dataset manager. The four named kinds are the
/// domain failures callers are expected to match on; everything else is
/// propagated from the underlying transport, archive, and table collaborators
/// without translation.
#[derive(Debug, Error)]
pub enum Error {
    /// The dataset path exists but is a plain file, not a directory.
    #[error("{} is not a directory", .0.display())]
    PathConflict(PathBuf),

    /// The dataset directory did not exist and could not be created.
    #[error("directory {} could not be created", .path.display())]
    DirectoryCreateFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote response carried no usable Last-Modified header. This is
    /// how a dead or misbehaving mirror shows up on the freshness probe.
    #[error("no Last-Modified header from remote")]
    ConnectionFailure,

    /// The downloaded archive could not be opened (corrupt download, wrong
    /// format, missing file).
    #[error("could not open dataset archive")]
    UnzipFailure(#[source] zip::result::ZipError),

    /// The extracted table file does not look like the expected DBF layout.
    #[error("malformed table file: {0}")]
    Table(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
