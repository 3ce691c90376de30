//! Keeps a local copy of the Russian Post postal-index dataset fresh.
//!
//! The pipeline is linear: probe the remote index page's `Last-Modified`
//! header, download the `PIndx.zip` archive, extract the DBF table it holds,
//! and transcode the table into a delimited text file (optionally recoded to
//! cp1251 for legacy consumers).
//!
//! ```no_run
//! use post_index::PostIndex;
//!
//! # fn main() -> Result<(), post_index::Error> {
//! let mut pi = PostIndex::new("/var/lib/post-index", None)?;
//! if pi.has_new_version()? {
//!     pi.refresh()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dbf;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod transport;
pub mod unzip;

pub use config::{Config, DBF_COLUMNS};
pub use error::Error;
pub use manager::PostIndex;
pub use transport::{HttpTransport, Transport};
