//! Spreadsheet upload: file type validation and the per-attempt state machine.
//!
//! ```text
//! Idle -> FileSelected -> Uploading -> Succeeded
//!                             |
//!                             +-----> Failed -> (begin again) Uploading
//! ```

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::client::KpiBackend;
use crate::error::{Error, Result};
use crate::kpi::KpiSnapshot;
use crate::store::{Persistence, SnapshotSource, SnapshotStore};

/// Spreadsheet formats the backend understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
    Xls,
}

impl FileKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            FileKind::Csv => "text/csv",
            FileKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileKind::Xls => "application/vnd.ms-excel",
        }
    }
}

/// Checks the extension of a selected file, case-insensitively.
///
/// # Errors
/// * `Error::UnsupportedFileType` for anything but `.csv`, `.xlsx` or `.xls`
///
/// # Examples
/// ```
/// use businalyst::upload::{validate_file_name, FileKind};
///
/// assert_eq!(validate_file_name("Sales.XLSX").unwrap(), FileKind::Xlsx);
/// assert!(validate_file_name("notes.txt").is_err());
/// ```
pub fn validate_file_name(name: &str) -> Result<FileKind> {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") => Ok(FileKind::Csv),
        Some("xlsx") => Ok(FileKind::Xlsx),
        Some("xls") => Ok(FileKind::Xls),
        _ => Err(Error::UnsupportedFileType {
            name: name.to_string(),
        }),
    }
}

/// A validated file waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub kind: FileKind,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let kind = validate_file_name(&name)?;
        Ok(Self { name, bytes, kind })
    }

    /// Validates the name before touching the disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let kind = validate_file_name(&name)?;
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        Ok(Self { name, bytes, kind })
    }
}

/// Observable state of the upload flow
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    FileSelected { file_name: String },
    Uploading { file_name: String },
    Succeeded { file_name: String },
    Failed { file_name: String, message: String },
}

/// One upload attempt at a time, with the selected file kept across failures
#[derive(Debug, Default)]
pub struct UploadFlow {
    selected: Option<SelectedFile>,
    state: UploadState,
}

impl UploadFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn selected(&self) -> Option<&SelectedFile> {
        self.selected.as_ref()
    }

    /// Replaces the selected file.
    ///
    /// # Errors
    /// * `Error::UploadInProgress` while a request is outstanding
    pub fn select(&mut self, file: SelectedFile) -> Result<()> {
        if self.is_uploading() {
            return Err(Error::UploadInProgress);
        }
        self.state = UploadState::FileSelected {
            file_name: file.name.clone(),
        };
        self.selected = Some(file);
        Ok(())
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self.state, UploadState::Uploading { .. })
    }

    /// Starts an attempt and hands out the file to send.
    ///
    /// # Errors
    /// * `Error::UploadInProgress` if an attempt is already running
    /// * `Error::NoFileSelected` if nothing was selected
    pub fn begin(&mut self) -> Result<SelectedFile> {
        if self.is_uploading() {
            return Err(Error::UploadInProgress);
        }
        let file = self.selected.clone().ok_or(Error::NoFileSelected)?;
        self.state = UploadState::Uploading {
            file_name: file.name.clone(),
        };
        Ok(file)
    }

    /// Ends the running attempt with the backend's answer.
    ///
    /// A successful payload replaces the store's snapshot. A failure, from
    /// the backend or from persisting, leaves the store as it was and is
    /// returned unchanged so the message reaches the user verbatim.
    ///
    /// # Errors
    /// * `Error::NoUploadInProgress` unless `begin` ran first; the store and
    ///   the state are left untouched
    pub fn finish<P: Persistence>(
        &mut self,
        outcome: Result<KpiSnapshot>,
        store: &mut SnapshotStore<P>,
    ) -> Result<()> {
        let file_name = match &self.state {
            UploadState::Uploading { file_name } => file_name.clone(),
            _ => return Err(Error::NoUploadInProgress),
        };

        let result = outcome.and_then(|snapshot| {
            store.load(
                snapshot,
                SnapshotSource::Uploaded {
                    file_name: file_name.clone(),
                    uploaded_at: Utc::now(),
                },
            )
        });

        match result {
            Ok(()) => {
                log::info!("upload of {} succeeded", file_name);
                self.state = UploadState::Succeeded { file_name };
                Ok(())
            }
            Err(e) => {
                log::warn!("upload of {} failed: {}", file_name, e);
                self.state = UploadState::Failed {
                    file_name,
                    message: e.to_string(),
                };
                Err(e)
            }
        }
    }

    /// Gives up on the running attempt without an answer, e.g. when the
    /// caller went away mid-request. The store is not touched and the file
    /// stays selected for a retry. Does nothing unless uploading.
    pub fn abandon(&mut self) {
        if let UploadState::Uploading { file_name } = &self.state {
            log::warn!("upload of {} abandoned before the backend answered", file_name);
            self.state = UploadState::Failed {
                file_name: file_name.clone(),
                message: "Upload abandoned".to_string(),
            };
        }
    }

    /// `begin`, send, `finish` in one go
    pub async fn submit<B, P>(&mut self, backend: &B, store: &mut SnapshotStore<P>) -> Result<()>
    where
        B: KpiBackend + ?Sized,
        P: Persistence,
    {
        let file = self.begin()?;
        let outcome = backend.upload(&file).await;
        self.finish(outcome, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPersistence;

    fn csv() -> SelectedFile {
        SelectedFile::new("sales.csv", b"date,revenue\n".to_vec()).unwrap()
    }

    #[test]
    fn extensions() {
        assert_eq!(validate_file_name("a.csv").unwrap(), FileKind::Csv);
        assert_eq!(validate_file_name("a.Xls").unwrap(), FileKind::Xls);
        assert!(matches!(
            validate_file_name("report.pdf"),
            Err(Error::UnsupportedFileType { .. })
        ));
        assert!(validate_file_name("csv").is_err());
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn begin_without_file() {
        let mut flow = UploadFlow::new();
        assert!(matches!(flow.begin(), Err(Error::NoFileSelected)));
        assert_eq!(flow.state(), &UploadState::Idle);
    }

    #[test]
    fn single_flight() {
        let mut flow = UploadFlow::new();
        flow.select(csv()).unwrap();
        flow.begin().unwrap();
        assert!(matches!(flow.begin(), Err(Error::UploadInProgress)));
        assert!(matches!(flow.select(csv()), Err(Error::UploadInProgress)));
    }

    #[test]
    fn failure_keeps_file_and_store() {
        let mut store = SnapshotStore::open(MemoryPersistence::new()).unwrap();
        store
            .load(KpiSnapshot::default(), SnapshotSource::Demo)
            .unwrap();

        let mut flow = UploadFlow::new();
        flow.select(csv()).unwrap();
        flow.begin().unwrap();
        let err = flow
            .finish(
                Err(Error::Backend {
                    status: 400,
                    message: "Missing columns".into(),
                }),
                &mut store,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing columns");
        assert_eq!(
            flow.state(),
            &UploadState::Failed {
                file_name: "sales.csv".into(),
                message: "Missing columns".into()
            }
        );
        assert_eq!(store.get().unwrap().source, SnapshotSource::Demo);

        // retry is allowed with the same file
        assert_eq!(flow.begin().unwrap().name, "sales.csv");
    }

    #[test]
    fn success_loads_store() {
        let mut store = SnapshotStore::open(MemoryPersistence::new()).unwrap();
        let mut flow = UploadFlow::new();
        flow.select(csv()).unwrap();
        flow.begin().unwrap();
        flow.finish(
            Ok(KpiSnapshot {
                revenue_sum: 5.0,
                ..Default::default()
            }),
            &mut store,
        )
        .unwrap();

        let stored = store.get().unwrap();
        assert_eq!(stored.snapshot.revenue_sum, 5.0);
        assert!(matches!(
            &stored.source,
            SnapshotSource::Uploaded { file_name, .. } if file_name == "sales.csv"
        ));
    }

    #[test]
    fn finish_without_begin_is_refused() {
        let mut store = SnapshotStore::open(MemoryPersistence::new()).unwrap();
        let mut flow = UploadFlow::new();
        let snapshot = || {
            Ok(KpiSnapshot {
                revenue_sum: 9.0,
                ..Default::default()
            })
        };

        let err = flow.finish(snapshot(), &mut store).unwrap_err();
        assert!(matches!(err, Error::NoUploadInProgress));
        assert!(err.is_validation());
        assert_eq!(flow.state(), &UploadState::Idle);
        assert!(store.get().is_none());

        // selected but not started
        flow.select(csv()).unwrap();
        assert!(matches!(
            flow.finish(snapshot(), &mut store),
            Err(Error::NoUploadInProgress)
        ));

        // a second answer for an attempt that already ended
        flow.begin().unwrap();
        flow.finish(snapshot(), &mut store).unwrap();
        assert!(matches!(
            flow.finish(snapshot(), &mut store),
            Err(Error::NoUploadInProgress)
        ));
        assert_eq!(
            flow.state(),
            &UploadState::Succeeded {
                file_name: "sales.csv".into()
            }
        );
    }

    #[test]
    fn abandoned_attempt_frees_the_flow() {
        let mut flow = UploadFlow::new();
        flow.abandon();
        assert_eq!(flow.state(), &UploadState::Idle);

        flow.select(csv()).unwrap();
        flow.begin().unwrap();
        flow.abandon();
        assert_eq!(
            flow.state(),
            &UploadState::Failed {
                file_name: "sales.csv".into(),
                message: "Upload abandoned".into()
            }
        );
        assert!(!flow.is_uploading());
        assert_eq!(flow.begin().unwrap().name, "sales.csv");
    }
}
