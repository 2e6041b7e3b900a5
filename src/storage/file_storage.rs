use crate::aggregation_state::AggregationState;
use crate::completion::CompletionLedgerEntry;
use crate::storage::{CompletionLedger, CorrelationStore, StorageError};
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const CORRELATIONS_DIR: &str = "correlations";
const LEDGER_DIR: &str = "ledger";
const STATE_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

#[derive(Debug)]
pub enum FileStorageError {
    Io(io::Error),
    Serde(serde_json::Error),
}
impl Error for FileStorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            FileStorageError::Io(ref e) => Some(e),
            FileStorageError::Serde(ref e) => Some(e),
        }
    }
}
impl StorageError for FileStorageError {}

impl fmt::Display for FileStorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FileStorageError::Io(ref e) => write!(f, "File Storage Error: {}", e),
            FileStorageError::Serde(ref e) => write!(f, "File Storage Error: {}", e),
        }
    }
}

impl From<io::Error> for FileStorageError {
    fn from(e: io::Error) -> FileStorageError {
        FileStorageError::Io(e)
    }
}

impl From<serde_json::Error> for FileStorageError {
    fn from(e: serde_json::Error) -> FileStorageError {
        FileStorageError::Serde(e)
    }
}

/// Durable storage in a directory tree:
///
/// ```text
/// <root>/correlations/<sha256 of id>.json   one AggregationState each
/// <root>/ledger/<sha256 of id>              one CompletionLedgerEntry each
/// ```
///
/// Both payloads carry the full correlation id. Every write goes to a temp
/// file which is synced before it is given its final name: states are
/// renamed over the old one, ledger entries are hard linked so an existing
/// entry is never replaced. The containing directory is synced after every
/// link, rename or remove, so a final name only ever refers to durable data.
pub struct FileStorage {
    correlations: PathBuf,
    ledger: PathBuf,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<FileStorage, FileStorageError> {
        let correlations = root.as_ref().join(CORRELATIONS_DIR);
        let ledger = root.as_ref().join(LEDGER_DIR);
        fs::create_dir_all(&correlations)?;
        fs::create_dir_all(&ledger)?;

        // Leftovers from writes interrupted by a crash
        remove_temp_files(&correlations)?;
        remove_temp_files(&ledger)?;

        sync_dir(root.as_ref())?;
        sync_dir(&correlations)?;
        sync_dir(&ledger)?;

        Ok(FileStorage {
            correlations,
            ledger,
        })
    }

    fn state_path(&self, correlation_id: &str) -> PathBuf {
        self.correlations
            .join(format!("{}.{}", file_name(correlation_id), STATE_EXT))
    }

    fn ledger_path(&self, correlation_id: &str) -> PathBuf {
        self.ledger.join(file_name(correlation_id))
    }
}

impl CorrelationStore for FileStorage {
    type Error = FileStorageError;

    fn store(&self, state: &AggregationState) -> Result<(), FileStorageError> {
        let path = self.state_path(&state.correlation_id);
        let temp_path = temp_path(&path);
        let payload = serde_json::to_vec(state)?;

        let result = write_synced(&temp_path, &payload)
            .and_then(|_| fs::rename(&temp_path, &path))
            .and_then(|_| sync_dir(&self.correlations));
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn retrieve(&self, correlation_id: &str) -> Result<Option<AggregationState>, FileStorageError> {
        match fs::read(self.state_path(correlation_id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, correlation_id: &str) -> Result<(), FileStorageError> {
        match fs::remove_file(self.state_path(correlation_id)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        sync_dir(&self.correlations)?;
        Ok(())
    }

    fn retrieve_all(&self) -> Result<Vec<AggregationState>, FileStorageError> {
        let mut states = Vec::new();
        for entry in fs::read_dir(&self.correlations)? {
            let path = entry?.path();
            if path.extension().map(|e| e == STATE_EXT).unwrap_or(false) {
                let bytes = fs::read(&path)?;
                states.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(states)
    }
}

impl CompletionLedger for FileStorage {
    type Error = FileStorageError;

    fn record(&self, entry: &CompletionLedgerEntry) -> Result<(), FileStorageError> {
        let path = self.ledger_path(&entry.correlation_id);
        let temp_path = temp_path(&path);
        let payload = serde_json::to_vec(entry)?;

        let result = write_synced(&temp_path, &payload)
            .and_then(|_| match fs::hard_link(&temp_path, &path) {
                Err(ref e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
                other => other,
            })
            .and_then(|_| fs::remove_file(&temp_path))
            .and_then(|_| sync_dir(&self.ledger));
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn contains(&self, correlation_id: &str) -> Result<bool, FileStorageError> {
        match fs::metadata(self.ledger_path(correlation_id)) {
            Ok(_) => Ok(true),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// Message ids can be longer than a file name may be, and hold any
// printable character, so name files by a digest
fn file_name(correlation_id: &str) -> String {
    format!("{:x}", Sha256::digest(correlation_id.as_bytes()))
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("{}.{}", Uuid::new_v4().to_simple(), TEMP_EXT))
}

fn remove_temp_files(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == TEMP_EXT).unwrap_or(false) {
            debug!("removing stale temp file {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn write_synced(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use chrono::Utc;

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = "<3a8f@direct.example.org>";

        {
            let storage = FileStorage::open(dir.path()).unwrap();
            let mut state = AggregationState::new(id, Utc::now());
            state.set_expected(
                vec![Address::parse("a@example.org").unwrap()]
                    .into_iter()
                    .collect(),
            );
            storage.store(&state).unwrap();
            storage.store(&state).unwrap();
        }

        let storage = FileStorage::open(dir.path()).unwrap();
        let state = storage.retrieve(id).unwrap().unwrap();
        assert_eq!(state.correlation_id, id);
        assert!(!state.is_orphan());
        assert_eq!(storage.retrieve_all().unwrap().len(), 1);

        storage.remove(id).unwrap();
        storage.remove(id).unwrap();
        assert!(storage.retrieve(id).unwrap().is_none());
    }

    #[test]
    fn test_ledger_is_idempotent_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let entry = CompletionLedgerEntry {
            correlation_id: "orig/1".to_owned(),
            completed_at: Utc::now(),
        };

        {
            let storage = FileStorage::open(dir.path()).unwrap();
            assert!(!storage.contains("orig/1").unwrap());
            storage.record(&entry).unwrap();
            storage.record(&entry).unwrap();
        }

        let storage = FileStorage::open(dir.path()).unwrap();
        assert!(storage.contains("orig/1").unwrap());
        assert!(!storage.contains("orig/2").unwrap());
    }

    #[test]
    fn test_long_correlation_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let id = format!("<{}@direct.{}.example.org>", "7".repeat(100), "h".repeat(80));
        assert!(id.len() > 200);

        storage.store(&AggregationState::new(&id, Utc::now())).unwrap();
        assert_eq!(storage.retrieve(&id).unwrap().unwrap().correlation_id, id);

        storage
            .record(&CompletionLedgerEntry {
                correlation_id: id.clone(),
                completed_at: Utc::now(),
            })
            .unwrap();
        assert!(storage.contains(&id).unwrap());
    }

    #[test]
    fn test_failed_ledger_write_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let entry = CompletionLedgerEntry {
            correlation_id: "<1@x.org>".to_owned(),
            completed_at: Utc::now(),
        };

        fs::remove_dir(dir.path().join(LEDGER_DIR)).unwrap();
        assert!(storage.record(&entry).is_err());

        fs::create_dir(dir.path().join(LEDGER_DIR)).unwrap();
        assert!(!storage.contains("<1@x.org>").unwrap());
        storage.record(&entry).unwrap();
        assert!(storage.contains("<1@x.org>").unwrap());
        assert_eq!(fs::read_dir(dir.path().join(LEDGER_DIR)).unwrap().count(), 1);
    }

    #[test]
    fn test_interrupted_ledger_write_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let stale = {
            let storage = FileStorage::open(dir.path()).unwrap();
            let stale = temp_path(&storage.ledger_path("<1@x.org>"));
            // A crash after the temp file was created, before it was linked
            fs::write(&stale, b"{").unwrap();
            assert!(!storage.contains("<1@x.org>").unwrap());
            stale
        };

        let storage = FileStorage::open(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(!storage.contains("<1@x.org>").unwrap());
    }
}
