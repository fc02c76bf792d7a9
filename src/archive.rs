use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::StoredSnapshot;

/// Saves a snapshot and its source as gzip-compressed JSON
pub fn save_archive(stored: &StoredSnapshot, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serde_json::to_writer(&mut writer, stored)?;

    let encoder = writer
        .into_inner()
        .map_err(|e| Error::io(path, e.into_error()))?;
    encoder
        .finish()
        .and_then(|mut file| file.flush())
        .map_err(|e| Error::io(path, e))?;

    log::info!("saved archive {}", path.display());
    Ok(())
}

/// Reads an archive written by [`save_archive`]
pub fn load_archive(path: impl AsRef<Path>) -> Result<StoredSnapshot> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let decoder = GzDecoder::new(file);
    let reader = BufReader::new(decoder);

    let stored: StoredSnapshot = serde_json::from_reader(reader)?;
    Ok(stored)
}

/// In-memory variant, for downloads
pub fn archive_to_bytes(stored: &StoredSnapshot) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, stored)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::KpiSnapshot;
    use crate::store::SnapshotSource;

    #[test]
    fn archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.kpi.gz");
        let stored = StoredSnapshot {
            snapshot: KpiSnapshot {
                profit_sum: 12.5,
                date_data: vec!["2024-01-01".into()],
                profit_data: vec![12.5],
                ..Default::default()
            },
            source: SnapshotSource::Demo,
        };

        save_archive(&stored, &path).unwrap();
        assert_eq!(load_archive(&path).unwrap(), stored);

        let bytes = archive_to_bytes(&stored).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn plain_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(load_archive(&path).is_err());
        assert!(matches!(
            load_archive(dir.path().join("missing.gz")),
            Err(Error::Io { .. })
        ));
    }
}
