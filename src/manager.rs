use std::fs::DirBuilder;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use encoding_rs::{IBM866, WINDOWS_1251};
use tracing::{info, instrument};

use crate::config::{Config, DBF_COLUMNS};
use crate::dbf::DbfReader;
use crate::error::{Error, Result};
use crate::fetch;
use crate::transport::{HttpTransport, Transport};
use crate::unzip;

/// Manager for one local copy of the postal-index dataset.
///
/// Owns a dataset directory and runs the check → download → unzip → transcode
/// pipeline against it. The remote `Last-Modified` timestamp is cached for
/// the lifetime of the instance once fetched; persistence of the local
/// version marker between runs is the caller's business.
pub struct PostIndex {
    dir: PathBuf,
    config: Config,
    transport: Box<dyn Transport>,
    last_modified: Option<DateTime<Utc>>,
    remote_last_modified: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for PostIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostIndex")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("last_modified", &self.last_modified)
            .field("remote_last_modified", &self.remote_last_modified)
            .finish_non_exhaustive()
    }
}

impl PostIndex {
    /// Create a manager over `dir` with the production HTTP transport.
    /// `last_modified` is the timestamp of the version the caller already
    /// has, if any.
    pub fn new(dir: impl Into<PathBuf>, last_modified: Option<DateTime<Utc>>) -> Result<Self> {
        let transport = Box::new(HttpTransport::new()?);
        Self::with_transport(dir, last_modified, Config::default(), transport)
    }

    /// Like [`PostIndex::new`] but with an explicit configuration and
    /// transport. The directory is created (parents included, with the
    /// configured mode) when missing; a plain file at that path is refused.
    pub fn with_transport(
        dir: impl Into<PathBuf>,
        last_modified: Option<DateTime<Utc>>,
        config: Config,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let dir = dir.into();
        if dir.is_file() {
            return Err(Error::PathConflict(dir));
        }
        if !dir.exists() {
            let mut builder = DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(config.dir_mode);
            }
            builder.create(&dir).map_err(|source| Error::DirectoryCreateFailure {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            dir,
            config,
            transport,
            last_modified,
            remote_last_modified: None,
        })
    }

    /// Probe the remote index page and report whether it is newer than the
    /// local version marker. With no local marker any remote version counts
    /// as new. The parsed remote timestamp is cached as a side effect.
    pub fn has_new_version(&mut self) -> Result<bool> {
        let raw = self
            .transport
            .last_modified(&self.config.base_url)?
            .ok_or(Error::ConnectionFailure)?;
        let remote = DateTime::parse_from_rfc2822(&raw)
            .map_err(|_| Error::ConnectionFailure)?
            .with_timezone(&Utc);
        info!(%remote, "remote dataset timestamp");
        self.remote_last_modified = Some(remote);
        Ok(self.last_modified.map_or(true, |local| local < remote))
    }

    /// The remote dataset's modification time, probing for it first if no
    /// staleness check has run yet.
    pub fn last_modified_on_website(&mut self) -> Result<DateTime<Utc>> {
        if let Some(remote) = self.remote_last_modified {
            return Ok(remote);
        }
        self.has_new_version()?;
        self.remote_last_modified.ok_or(Error::ConnectionFailure)
    }

    /// [`PostIndex::refresh_with`] using the configured delimiter and UTF-8
    /// output.
    pub fn refresh(&mut self) -> Result<&mut Self> {
        let delimiter = self.config.csv_delimiter;
        self.refresh_with(delimiter, false)
    }

    /// Download the archive, extract the table file, and rewrite it as CSV.
    ///
    /// The header row and every data row carry the fixed columns in table
    /// order. `actdate` is reformatted as `DD.MM.YYYY` (blank dates emit an
    /// empty cell); other fields pass through as-is, or recoded to cp1251
    /// when `legacy_encoding` is set. Returns the manager for chaining.
    #[instrument(level = "info", skip(self), fields(dir = %self.dir.display()))]
    pub fn refresh_with(&mut self, delimiter: u8, legacy_encoding: bool) -> Result<&mut Self> {
        fetch::download(
            self.transport.as_ref(),
            &self.config.archive_url(),
            &self.config.archive_path(&self.dir),
        )?;
        unzip::extract_table(&self.dir, &self.config.archive_name, &self.config.dbf_name)?;

        let mut table = DbfReader::open(&self.config.dbf_path(&self.dir), &DBF_COLUMNS, IBM866)?;
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(self.config.csv_path(&self.dir))?;
        writer.write_record(DBF_COLUMNS)?;

        let mut rows = 0u64;
        while let Some(record) = table.next_record()? {
            let mut row: Vec<Vec<u8>> = Vec::with_capacity(DBF_COLUMNS.len());
            for column in DBF_COLUMNS {
                if column == "actdate" {
                    let cell = record
                        .date(column)?
                        .map(|d| d.format("%d.%m.%Y").to_string())
                        .unwrap_or_default();
                    row.push(cell.into_bytes());
                } else {
                    let text = record.text(column)?;
                    if legacy_encoding {
                        let (encoded, _, _) = WINDOWS_1251.encode(&text);
                        row.push(encoded.into_owned());
                    } else {
                        row.push(text.into_bytes());
                    }
                }
            }
            writer.write_record(&row)?;
            rows += 1;
        }
        writer.flush()?;
        info!(rows, csv = %self.config.csv_name, "transcoded table");
        Ok(self)
    }

    /// Path of the generated CSV, or `None` while no such file exists.
    pub fn csv_path(&self) -> Option<PathBuf> {
        let path = self.config.csv_path(&self.dir);
        path.exists().then_some(path)
    }

    /// Path of the extracted table file, or `None` while no such file exists.
    pub fn dbf_path(&self) -> Option<PathBuf> {
        let path = self.config.dbf_path(&self.dir);
        path.exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbf::testutil::build_dbf;
    use anyhow::Result;
    use chrono::TimeZone;
    use std::fs::{self, File};
    use std::io::{Cursor, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    use zip::write::{ExtendedFileOptions, FileOptions};
    use zip::CompressionMethod;

    fn init_tracing() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    struct MockTransport {
        header: Option<String>,
        body: Vec<u8>,
        head_calls: Arc<AtomicUsize>,
    }

    impl MockTransport {
        fn new(header: Option<&str>, body: Vec<u8>) -> Self {
            Self {
                header: header.map(|h| h.to_string()),
                body,
                head_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Transport for MockTransport {
        fn last_modified(&self, _url: &str) -> crate::error::Result<Option<String>> {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.header.clone())
        }
        fn fetch(&self, _url: &str) -> crate::error::Result<Box<dyn Read>> {
            Ok(Box::new(Cursor::new(self.body.clone())))
        }
    }

    const REMOTE_STAMP: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

    fn remote_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap()
    }

    fn manager(
        dir: impl Into<PathBuf>,
        local: Option<DateTime<Utc>>,
        transport: MockTransport,
    ) -> Result<PostIndex> {
        Ok(PostIndex::with_transport(
            dir,
            local,
            Config::default(),
            Box::new(transport),
        )?)
    }

    /// Zip archive holding a three-record PIndx table with all 11 columns.
    fn sample_archive() -> Vec<u8> {
        let fields = vec![
            ("index", b'C', 6),
            ("opsname", b'C', 30),
            ("opstype", b'C', 20),
            ("opssubm", b'C', 6),
            ("region", b'C', 30),
            ("autonom", b'C', 30),
            ("area", b'C', 30),
            ("city", b'C', 30),
            ("city_1", b'C', 30),
            ("actdate", b'D', 8),
            ("indexold", b'C', 6),
        ];
        let records = vec![
            (
                false,
                vec![
                    "101000", "Москва", "ГСП", "101000", "Москва", "", "", "Москва", "",
                    "20240105", "",
                ],
            ),
            (
                false,
                vec![
                    "690000", "Владивосток", "Почтамт", "690700", "Приморский край", "", "",
                    "Владивосток", "", "20231120", "690001",
                ],
            ),
            (
                false,
                vec![
                    "163002", "Архангельск 2", "ОПС", "163000", "Архангельская область", "",
                    "", "Архангельск", "", "20240217", "",
                ],
            ),
            // actdate blank
            (
                false,
                vec![
                    "445027", "Тольятти 27", "ОПС", "445000", "Самарская область", "", "",
                    "Тольятти", "", "", "445027",
                ],
            ),
        ];
        let dbf = build_dbf(&fields, &records);

        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = FileOptions::<ExtendedFileOptions>::default()
                .compression_method(CompressionMethod::Stored);
            zip.start_file("PIndx05.dbf", options).unwrap();
            zip.write_all(&dbf).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn rejects_plain_file_as_dataset_dir() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("data");
        File::create(&file_path)?;

        let err = manager(&file_path, None, MockTransport::new(None, vec![])).unwrap_err();
        assert!(matches!(
            err.downcast::<Error>()?,
            Error::PathConflict(_)
        ));
        Ok(())
    }

    #[test]
    fn creates_missing_directory_with_mode() -> Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("a").join("b");

        manager(&nested, None, MockTransport::new(None, vec![]))?;

        assert!(nested.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&nested)?.permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
        Ok(())
    }

    #[test]
    fn no_local_marker_means_new_version() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(Some(REMOTE_STAMP), vec![]))?;
        assert!(pi.has_new_version()?);
        Ok(())
    }

    #[test]
    fn older_local_marker_means_new_version() -> Result<()> {
        let dir = tempdir()?;
        let local = remote_instant() - chrono::Duration::days(3);
        let mut pi = manager(dir.path(), Some(local), MockTransport::new(Some(REMOTE_STAMP), vec![]))?;
        assert!(pi.has_new_version()?);
        Ok(())
    }

    #[test]
    fn equal_or_newer_local_marker_means_no_new_version() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(
            dir.path(),
            Some(remote_instant()),
            MockTransport::new(Some(REMOTE_STAMP), vec![]),
        )?;
        assert!(!pi.has_new_version()?);

        let dir = tempdir()?;
        let local = remote_instant() + chrono::Duration::hours(1);
        let mut pi = manager(dir.path(), Some(local), MockTransport::new(Some(REMOTE_STAMP), vec![]))?;
        assert!(!pi.has_new_version()?);
        Ok(())
    }

    #[test]
    fn missing_header_is_connection_failure() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, vec![]))?;
        assert!(matches!(pi.has_new_version(), Err(Error::ConnectionFailure)));
        Ok(())
    }

    #[test]
    fn unparseable_header_is_connection_failure() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(Some("not a date"), vec![]))?;
        assert!(matches!(pi.has_new_version(), Err(Error::ConnectionFailure)));
        Ok(())
    }

    #[test]
    fn website_timestamp_probes_once_and_caches() -> Result<()> {
        let dir = tempdir()?;
        let transport = MockTransport::new(Some(REMOTE_STAMP), vec![]);
        let calls = Arc::clone(&transport.head_calls);
        let mut pi = manager(dir.path(), None, transport)?;

        assert_eq!(pi.last_modified_on_website()?, remote_instant());
        assert_eq!(pi.last_modified_on_website()?, remote_instant());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn refresh_writes_header_and_all_records() -> Result<()> {
        init_tracing();
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;

        pi.refresh()?;

        let csv = fs::read_to_string(pi.csv_path().expect("csv exists"))?;
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "index;opsname;opstype;opssubm;region;autonom;area;city;city_1;actdate;indexold"
        );
        assert_eq!(lines.len(), 5, "header plus four records");
        assert!(lines[1].starts_with("101000;Москва;"));
        Ok(())
    }

    #[test]
    fn refresh_formats_actdate() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;

        pi.refresh()?;

        let csv = fs::read_to_string(pi.csv_path().unwrap())?;
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1].split(';').nth(9), Some("05.01.2024"));
        assert_eq!(lines[2].split(';').nth(9), Some("20.11.2023"));
        Ok(())
    }

    #[test]
    fn blank_actdate_emits_empty_cell() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;

        pi.refresh()?;

        let csv = fs::read_to_string(pi.csv_path().unwrap())?;
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[4].starts_with("445027;"));
        assert_eq!(lines[4].split(';').nth(9), Some(""));
        Ok(())
    }

    #[test]
    fn refresh_with_custom_delimiter() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;

        pi.refresh_with(b',', false)?;

        let csv = fs::read_to_string(pi.csv_path().unwrap())?;
        assert!(csv.starts_with("index,opsname,"));
        Ok(())
    }

    #[test]
    fn refresh_legacy_encoding_recodes_fields() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;
        pi.refresh_with(b';', true)?;
        let raw = fs::read(pi.csv_path().unwrap())?;
        let (expected, _, _) = WINDOWS_1251.encode("Москва");
        assert!(
            raw.windows(expected.len()).any(|w| w == &expected[..]),
            "cp1251 bytes not found in output"
        );

        // utf-8 run for comparison: the same field is byte-identical to the source text
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;
        pi.refresh()?;
        let raw = fs::read(pi.csv_path().unwrap())?;
        assert!(raw
            .windows("Москва".len())
            .any(|w| w == "Москва".as_bytes()));
        Ok(())
    }

    #[test]
    fn path_accessors_track_files_on_disk() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(dir.path(), None, MockTransport::new(None, sample_archive()))?;
        assert_eq!(pi.csv_path(), None);
        assert_eq!(pi.dbf_path(), None);

        pi.refresh()?;
        let csv = pi.csv_path().expect("csv after refresh");
        let dbf = pi.dbf_path().expect("dbf after refresh");
        assert_eq!(csv, dir.path().join("post-index.csv"));
        assert_eq!(dbf, dir.path().join("post-index.dbf"));

        fs::remove_file(&csv)?;
        fs::remove_file(&dbf)?;
        assert_eq!(pi.csv_path(), None);
        assert_eq!(pi.dbf_path(), None);
        Ok(())
    }

    #[test]
    fn corrupt_download_surfaces_unzip_failure() -> Result<()> {
        let dir = tempdir()?;
        let mut pi = manager(
            dir.path(),
            None,
            MockTransport::new(None, b"definitely not a zip".to_vec()),
        )?;

        assert!(matches!(pi.refresh(), Err(Error::UnzipFailure(_))));
        assert_eq!(pi.dbf_path(), None);
        assert_eq!(pi.csv_path(), None);
        Ok(())
    }
}
