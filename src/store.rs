use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::StoreError;
use crate::listing::Snapshot;

const ARCHIVE_PREFIX: &str = "backup_products_";
const ARCHIVE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// JSON-file persistence for the current snapshot plus write-once archives of rejected scrapes.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the saved snapshot, or an empty one on first run.
    pub fn load(&self) -> Result<Snapshot, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No saved snapshot, starting empty");
                return Ok(Snapshot::new());
            }
            Err(source) => return Err(io_error(&self.path, source)),
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the saved snapshot. The new contents land in a sibling temp file first
    /// and are renamed over the store.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }

        let tmp = temp_path(&self.path);
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&tmp)
            .map_err(|source| io_error(&tmp, source))?;
        write_pretty(file, snapshot, &tmp)?;
        fs::rename(&tmp, &self.path).map_err(|source| io_error(&self.path, source))?;

        tracing::info!(
            listings = snapshot.len(),
            path = %self.path.display(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Writes `snapshot` to a new timestamped file in the archive directory and returns its path.
    /// An existing file is never replaced; a numeric suffix is added instead.
    pub fn archive(&self, snapshot: &Snapshot, at: DateTime<Local>) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.archive_dir).map_err(|source| io_error(&self.archive_dir, source))?;

        let stamp = at.format(ARCHIVE_TIME_FORMAT).to_string();
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("{ARCHIVE_PREFIX}{stamp}.json"),
                n => format!("{ARCHIVE_PREFIX}{stamp}-{n}.json"),
            };
            let path = self.archive_dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_pretty(file, snapshot, &path)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(io_error(&path, source)),
            }
        }
    }
}

fn write_pretty(file: fs::File, snapshot: &Snapshot, path: &Path) -> Result<(), StoreError> {
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer
        .flush()
        .and_then(|_| writer.get_ref().sync_all())
        .map_err(|source| io_error(path, source))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
