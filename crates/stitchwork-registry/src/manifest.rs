//! Manifest codec
//!
//! The manifest is a JSON array of artifact records kept next to the
//! artifacts themselves. Writes go to a sibling temp file which is fsynced
//! and then renamed over the manifest, so a crash mid-write leaves the
//! previous manifest intact.
//!
//! Loading never fails. A missing or empty manifest is an empty registry; a
//! manifest that cannot be decoded is moved aside to
//! `<manifest>.bak.<unix-seconds>` and replaced by an empty one.

use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use stitchwork_common::{ArtifactRecord, Error, Result};
use tracing::{debug, error, info, warn};

/// Result of decoding manifest text
#[derive(Debug)]
pub enum Decoded {
    /// Blank content
    Empty,
    /// A well-formed list of records
    Records(Vec<ArtifactRecord>),
    /// Content that is not JSON at all
    Malformed(String),
    /// Valid JSON that is not a list of records
    WrongShape(String),
}

/// Decode manifest text without touching the filesystem
#[must_use]
pub fn decode(text: &str) -> Decoded {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Decoded::Empty;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => return Decoded::Malformed(e.to_string()),
    };

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Decoded::WrongShape(format!("expected a list, found {}", json_kind(&other)));
        }
    };

    match serde_json::from_value::<Vec<ArtifactRecord>>(Value::Array(items)) {
        Ok(records) => Decoded::Records(records),
        Err(e) => Decoded::WrongShape(format!("invalid record: {e}")),
    }
}

/// Decode raw manifest bytes; invalid UTF-8 counts as malformed
#[must_use]
pub fn decode_bytes(bytes: &[u8]) -> Decoded {
    match std::str::from_utf8(bytes) {
        Ok(text) => decode(text),
        Err(e) => Decoded::Malformed(format!("invalid UTF-8: {e}")),
    }
}

/// Serialize records the way they are stored on disk
pub fn encode(records: &[ArtifactRecord]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(records)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// How a load ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No manifest on disk
    Missing,
    /// Manifest present but blank
    Empty,
    /// Records decoded
    Loaded,
    /// Manifest unreadable; the original was moved to `archive` if possible
    Quarantined {
        archive: Option<PathBuf>,
        reason: String,
    },
    /// Manifest could not be read at all
    Unreadable(String),
}

/// Records plus the way they were obtained
#[derive(Debug)]
pub struct ManifestLoad {
    pub records: Vec<ArtifactRecord>,
    pub outcome: LoadOutcome,
}

/// On-disk manifest of tracked artifacts
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    temp_path: PathBuf,
}

impl Manifest {
    /// Create a codec for the manifest at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        Self {
            path,
            temp_path: PathBuf::from(temp),
        }
    }

    /// Manifest location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, recovering from every kind of damage
    #[must_use]
    pub fn load(&self) -> Vec<ArtifactRecord> {
        self.load_with_outcome().records
    }

    /// Load the manifest and report how it went
    pub fn load_with_outcome(&self) -> ManifestLoad {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "Manifest {:?} not found, it will be created on first write",
                    self.path
                );
                return ManifestLoad {
                    records: Vec::new(),
                    outcome: LoadOutcome::Missing,
                };
            }
            Err(e) => {
                error!("Failed to read manifest {:?}: {}", self.path, e);
                return ManifestLoad {
                    records: Vec::new(),
                    outcome: LoadOutcome::Unreadable(e.to_string()),
                };
            }
        };

        if bytes.is_empty() {
            warn!("Manifest {:?} is zero-length, starting empty", self.path);
            return ManifestLoad {
                records: Vec::new(),
                outcome: LoadOutcome::Empty,
            };
        }

        match decode_bytes(&bytes) {
            Decoded::Empty => {
                warn!("Manifest {:?} is blank, starting empty", self.path);
                ManifestLoad {
                    records: Vec::new(),
                    outcome: LoadOutcome::Empty,
                }
            }
            Decoded::Records(records) => {
                debug!("Loaded {} records from {:?}", records.len(), self.path);
                ManifestLoad {
                    records,
                    outcome: LoadOutcome::Loaded,
                }
            }
            Decoded::Malformed(reason) => {
                error!("Manifest {:?} is not valid JSON: {}", self.path, reason);
                self.quarantine(reason)
            }
            Decoded::WrongShape(reason) => {
                warn!("Manifest {:?} has the wrong shape: {}", self.path, reason);
                self.quarantine(reason)
            }
        }
    }

    /// Move a damaged manifest aside and start over with an empty one
    fn quarantine(&self, reason: String) -> ManifestLoad {
        let archive = self.archive_path();
        let archive = match fs::rename(&self.path, &archive) {
            Ok(()) => {
                info!("Damaged manifest moved to {:?}", archive);
                Some(archive)
            }
            Err(e) => {
                error!("Failed to move damaged manifest {:?} aside: {}", self.path, e);
                None
            }
        };

        if archive.is_some() {
            if let Err(e) = self.save(&[]) {
                warn!("Failed to write fresh manifest {:?}: {}", self.path, e);
            }
        }

        ManifestLoad {
            records: Vec::new(),
            outcome: LoadOutcome::Quarantined { archive, reason },
        }
    }

    /// Pick an unused `<manifest>.bak.<secs>` name
    fn archive_path(&self) -> PathBuf {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let base = format!("{}.bak.{secs}", self.path.display());
        let mut candidate = PathBuf::from(&base);
        let mut n = 1u32;
        while candidate.exists() {
            candidate = PathBuf::from(format!("{base}.{n}"));
            n += 1;
        }
        candidate
    }

    /// Atomically replace the manifest with `records`
    pub fn save(&self, records: &[ArtifactRecord]) -> Result<()> {
        let data = encode(records)?;

        if let Err(e) = self.write_temp(&data) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&self.temp_path, &self.path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(Error::manifest_io(&self.path, e));
        }

        debug!("Saved {} records to {:?}", records.len(), self.path);
        Ok(())
    }

    fn write_temp(&self, data: &[u8]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| Error::manifest_io(&self.temp_path, e))?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(data)
            .map_err(|e| Error::manifest_io(&self.temp_path, e))?;
        writer
            .flush()
            .map_err(|e| Error::manifest_io(&self.temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::manifest_io(&self.temp_path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitchwork_common::{ArtifactKind, MANIFEST_FILE_NAME};
    use tempfile::tempdir;

    fn archives_in(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().contains(".bak."))
            .collect()
    }

    fn sample_records() -> Vec<ArtifactRecord> {
        vec![
            ArtifactRecord::new(
                "id1".into(),
                "/data/id1_input.png",
                1024,
                1_700_000_000.125,
                ArtifactKind::Input,
            ),
            ArtifactRecord::new(
                "id1".into(),
                "/data/id1_numbered_pattern.png",
                4096,
                1_700_000_001.5,
                ArtifactKind::Pattern,
            ),
            ArtifactRecord::new(
                "id2".into(),
                "/data/id2_thumb.png",
                10,
                1_700_000_002.0,
                ArtifactKind::Other("thumb".into()),
            ),
        ]
    }

    #[test]
    fn test_save_then_load_preserves_order_and_fields() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::new(dir.path().join(MANIFEST_FILE_NAME));
        let records = sample_records();

        manifest.save(&records).unwrap();
        let loaded = manifest.load_with_outcome();

        assert_eq!(loaded.outcome, LoadOutcome::Loaded);
        assert_eq!(loaded.records, records);
        assert!(!dir.path().join(".file_queue.json.tmp").exists());
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::new(dir.path().join(MANIFEST_FILE_NAME));

        let loaded = manifest.load_with_outcome();
        assert!(loaded.records.is_empty());
        assert_eq!(loaded.outcome, LoadOutcome::Missing);
        assert!(!manifest.path().exists());
    }

    #[test]
    fn test_zero_length_manifest_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(&path, "").unwrap();

        let loaded = Manifest::new(&path).load_with_outcome();
        assert!(loaded.records.is_empty());
        assert_eq!(loaded.outcome, LoadOutcome::Empty);
        assert!(archives_in(dir.path()).is_empty());
    }

    #[test]
    fn test_whitespace_manifest_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(&path, "  \n\t ").unwrap();

        assert!(Manifest::new(&path).load().is_empty());
    }

    #[test]
    fn test_malformed_manifest_is_archived() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(&path, "[{\"file_id\": ").unwrap();

        let loaded = Manifest::new(&path).load_with_outcome();
        assert!(loaded.records.is_empty());
        let archive = match loaded.outcome {
            LoadOutcome::Quarantined { archive, .. } => archive.unwrap(),
            other => panic!("expected quarantine, got {other:?}"),
        };
        assert_eq!(fs::read_to_string(&archive).unwrap(), "[{\"file_id\": ");

        // A fresh, empty manifest takes its place
        assert_eq!(Manifest::new(&path).load_with_outcome().outcome, LoadOutcome::Loaded);
        assert!(Manifest::new(&path).load().is_empty());
    }

    #[test]
    fn test_mapping_manifest_is_archived() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(&path, r#"{"not":"a list"}"#).unwrap();

        let records = Manifest::new(&path).load();
        assert!(records.is_empty());

        let archives = archives_in(dir.path());
        assert_eq!(archives.len(), 1);
        assert_eq!(
            fs::read_to_string(&archives[0]).unwrap(),
            r#"{"not":"a list"}"#
        );
    }

    #[test]
    fn test_list_of_non_records_is_wrong_shape() {
        assert!(matches!(decode("[1, 2, 3]"), Decoded::WrongShape(_)));
        assert!(matches!(decode("\"text\""), Decoded::WrongShape(_)));
        assert!(matches!(decode("[]"), Decoded::Records(r) if r.is_empty()));
        assert!(matches!(decode_bytes(&[0xff, 0xfe]), Decoded::Malformed(_)));
    }

    #[test]
    fn test_archive_names_do_not_collide() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);

        fs::write(&path, "garbage one").unwrap();
        let _ = Manifest::new(&path).load();
        fs::write(&path, "garbage two").unwrap();
        let _ = Manifest::new(&path).load();

        let mut contents: Vec<String> = archives_in(dir.path())
            .iter()
            .map(|p| fs::read_to_string(p).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["garbage one", "garbage two"]);
    }

    #[test]
    fn test_accepts_externally_written_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(
            &path,
            r#"[
  {
    "file_id": "abc",
    "file_path": "uploads/abc_preview.png",
    "file_name": "abc_preview.png",
    "file_size": 5120,
    "timestamp": 1712345678.901234,
    "datetime": "2024-04-05T19:34:38.901234",
    "file_type": "preview"
  }
]"#,
        )
        .unwrap();

        let records = Manifest::new(&path).load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ArtifactKind::Preview);
        assert_eq!(records[0].size_bytes, 5120);
        assert_eq!(records[0].created_at_iso, "2024-04-05T19:34:38.901234");
    }

    #[test]
    fn test_save_overwrites_previous_content() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::new(dir.path().join(MANIFEST_FILE_NAME));

        manifest.save(&sample_records()).unwrap();
        manifest.save(&[]).unwrap();

        assert_eq!(fs::read_to_string(manifest.path()).unwrap(), "[]");
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), b"x").unwrap();
        let manifest = Manifest::new(&path);

        let err = manifest.save(&sample_records()).unwrap_err();

        assert!(matches!(err, Error::ManifestIo { .. }));
        assert!(!manifest.temp_path.exists());
        assert!(path.join("inner").exists());
    }
}
