//! The KPI store: the one place the current snapshot lives.
//!
//! Storage goes through the [`Persistence`] port so the store can be backed by
//! a file in production and by memory in tests. Every change is persisted
//! before it becomes visible in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::kpi::KpiSnapshot;

/// File name of the persisted blob inside the data directory
pub const SNAPSHOT_FILE: &str = "kpi_snapshot.json";

/// Where the current snapshot came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotSource {
    Uploaded {
        file_name: String,
        uploaded_at: DateTime<Utc>,
    },
    Archive {
        path: PathBuf,
    },
    Demo,
}

impl SnapshotSource {
    pub fn is_demo(&self) -> bool {
        matches!(self, SnapshotSource::Demo)
    }
}

/// A snapshot together with its provenance, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub snapshot: KpiSnapshot,
    pub source: SnapshotSource,
}

/// Storage port for the persisted blob
pub trait Persistence: Send {
    /// Returns the stored blob, `None` if nothing was ever written
    fn read(&self) -> Result<Option<String>>;

    /// Replaces the stored blob. Must leave the previous blob intact on failure.
    fn write(&mut self, blob: &str) -> Result<()>;

    /// Deletes the stored blob; deleting nothing is not an error
    fn remove(&mut self) -> Result<()>;
}

impl<P: Persistence + ?Sized> Persistence for Box<P> {
    fn read(&self) -> Result<Option<String>> {
        (**self).read()
    }

    fn write(&mut self, blob: &str) -> Result<()> {
        (**self).write(blob)
    }

    fn remove(&mut self) -> Result<()> {
        (**self).remove()
    }
}

/// Blob stored as `kpi_snapshot.json` in a data directory
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(SNAPSHOT_FILE);
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for FilePersistence {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    /// Writes to a temporary file next to the target and renames it into
    /// place, so readers only ever see a complete blob.
    fn write(&mut self, blob: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        tmp.write_all(blob.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::io(&self.path, e.error))?;

        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }
}

/// In-memory blob, for tests and for running without a data directory
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    blob: Option<String>,
    fail_writes: bool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an already persisted blob
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Some(blob.into()),
            fail_writes: false,
        }
    }

    /// Makes every following `write` fail, as a full disk would
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn blob(&self) -> Option<&str> {
        self.blob.as_deref()
    }
}

impl Persistence for MemoryPersistence {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.blob.clone())
    }

    fn write(&mut self, blob: &str) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Io {
                path: PathBuf::from(SNAPSHOT_FILE),
                message: "simulated write failure".to_string(),
            });
        }
        self.blob = Some(blob.to_string());
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.blob = None;
        Ok(())
    }
}

/// Owner of the current KPI snapshot.
///
/// `get()` returning `None` means "no data", which is different from a
/// loaded snapshot whose sums are all zero.
#[derive(Debug)]
pub struct SnapshotStore<P: Persistence> {
    persistence: P,
    current: Option<StoredSnapshot>,
}

impl<P: Persistence> SnapshotStore<P> {
    /// Opens the store, restoring whatever was persisted last.
    ///
    /// # Errors
    /// * Propagates read failures of the persistence port
    ///
    /// # Notes
    /// * A blob that does not parse is logged and treated as no data. It is
    ///   left in place so it can be inspected.
    pub fn open(persistence: P) -> Result<Self> {
        let current = match persistence.read()? {
            None => None,
            Some(blob) => match serde_json::from_str::<StoredSnapshot>(&blob) {
                Ok(stored) => {
                    log::info!("restored persisted KPI snapshot ({:?})", stored.source);
                    Some(stored)
                }
                Err(e) => {
                    log::warn!("ignoring corrupt persisted KPI snapshot: {}", e);
                    None
                }
            },
        };

        Ok(Self {
            persistence,
            current,
        })
    }

    /// Replaces the current snapshot.
    ///
    /// The new snapshot is persisted first; if that fails the error is
    /// returned and both the persisted blob and the in-memory snapshot stay
    /// as they were.
    pub fn load(&mut self, snapshot: KpiSnapshot, source: SnapshotSource) -> Result<()> {
        let stored = StoredSnapshot { snapshot, source };
        let blob = serde_json::to_string(&stored)?;

        if let Err(e) = self.persistence.write(&blob) {
            log::error!("failed to persist KPI snapshot: {}", e);
            return Err(e);
        }

        log::info!("loaded KPI snapshot ({:?})", stored.source);
        self.current = Some(stored);
        Ok(())
    }

    /// Drops the snapshot, persisted copy first
    pub fn clear(&mut self) -> Result<()> {
        if let Err(e) = self.persistence.remove() {
            log::error!("failed to remove persisted KPI snapshot: {}", e);
            return Err(e);
        }
        self.current = None;
        log::info!("cleared KPI snapshot");
        Ok(())
    }

    pub fn get(&self) -> Option<&StoredSnapshot> {
        self.current.as_ref()
    }

    /// The snapshot alone, without its source
    pub fn snapshot(&self) -> Option<&KpiSnapshot> {
        self.current.as_ref().map(|s| &s.snapshot)
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn persistence_mut(&mut self) -> &mut P {
        &mut self.persistence
    }
}
