use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use turnero_core::persistence::{LedgerSnapshot, ReservationStore, StoreError};

/// Opens the reservations file at `path`, creating nothing until the first save.
pub fn open(path: impl Into<PathBuf>) -> JsonFileStore {
    JsonFileStore::new(path)
}

/// Ledger snapshot kept as a single JSON object on disk.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ReservationStore for JsonFileStore {
    /// A missing or unreadable-as-JSON file yields an empty ledger. Only I/O
    /// failures other than "not found" are errors.
    fn load(&self) -> Result<LedgerSnapshot, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(
                    event_name = "store.load.missing",
                    path = %self.path.display(),
                    "reservations file not found; starting with an empty ledger"
                );
                return Ok(LedgerSnapshot::default());
            }
            Err(source) => return Err(StoreError::Read { path: self.path.clone(), source }),
        };

        match serde_json::from_str::<LedgerSnapshot>(&raw) {
            Ok(snapshot) => {
                debug!(
                    event_name = "store.load.completed",
                    path = %self.path.display(),
                    entries = snapshot.len(),
                    "reservations file loaded"
                );
                Ok(snapshot)
            }
            Err(error) => {
                warn!(
                    event_name = "store.load.malformed",
                    path = %self.path.display(),
                    error = %error,
                    "reservations file is not valid JSON; starting with an empty ledger"
                );
                Ok(LedgerSnapshot::default())
            }
        }
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| StoreError::Write { path: parent.to_path_buf(), source })?;
        }

        let encoded = serde_json::to_string(snapshot)?;
        let staging = self.staging_path();
        fs::write(&staging, encoded)
            .map_err(|source| StoreError::Write { path: staging.clone(), source })?;
        fs::rename(&staging, &self.path)
            .map_err(|source| StoreError::Write { path: self.path.clone(), source })?;

        debug!(
            event_name = "store.save.completed",
            path = %self.path.display(),
            entries = snapshot.len(),
            "reservations file written"
        );
        Ok(())
    }
}
