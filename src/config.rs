use std::path::{Path, PathBuf};

/// Column names of the PIndx DBF table, in file order. The CSV output keeps
/// this order for the header row and every data row.
///
/// index     postal index of the operations point
/// opsname   operations point name
/// opstype   operations point type
/// opssubm   index of the parent operations point in the subordination hierarchy
/// region    oblast / krai / republic
/// autonom   autonomous region
/// area      district
/// city      settlement
/// city_1    subordinate settlement
/// actdate   date the record was last actualized
/// indexold  postal index under the previous indexation system
pub const DBF_COLUMNS: [&str; 11] = [
    "index", "opsname", "opstype", "opssubm", "region", "autonom", "area", "city", "city_1",
    "actdate", "indexold",
];

/// Fixed configuration for one dataset: where it lives remotely and what the
/// local artifacts are called. Held explicitly (rather than as module
/// constants) so tests can point the manager at fixtures.
#[derive(Debug, Clone)]
pub struct Config {
    /// Index page URL. HEAD requests for the freshness probe go here; the
    /// archive filename is appended for the download.
    pub base_url: String,
    /// Remote archive filename, also used for the transient local copy.
    pub archive_name: String,
    /// Canonical name the extracted table is renamed to.
    pub dbf_name: String,
    /// Canonical output filename.
    pub csv_name: String,
    /// Mode the dataset directory is created with when absent.
    pub dir_mode: u32,
    /// Field delimiter used by `refresh`.
    pub csv_delimiter: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://vinfo.russianpost.ru/database/".to_string(),
            archive_name: "PIndx.zip".to_string(),
            dbf_name: "post-index.dbf".to_string(),
            csv_name: "post-index.csv".to_string(),
            dir_mode: 0o700,
            csv_delimiter: b';',
        }
    }
}

impl Config {
    /// URL of the archive itself: base URL with the archive filename appended.
    pub fn archive_url(&self) -> String {
        format!("{}{}", self.base_url, self.archive_name)
    }

    pub fn archive_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.archive_name)
    }

    pub fn dbf_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.dbf_name)
    }

    pub fn csv_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.csv_name)
    }
}
