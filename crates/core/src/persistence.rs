use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::user::UserId;

/// On-disk shape of the ledger: slot key to `[owner_id, end_time]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerSnapshot {
    pub entries: BTreeMap<String, PersistedSlot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSlot(pub u64, pub String);

impl PersistedSlot {
    pub fn owner_id(&self) -> UserId {
        UserId(self.0)
    }

    pub fn end(&self) -> &str {
        &self.1
    }
}

impl LedgerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn owner_ids(&self) -> BTreeSet<UserId> {
        self.entries.values().map(PersistedSlot::owner_id).collect()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read reservations file `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not write reservations file `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("could not encode reservations: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("reservation store unavailable: {0}")]
    Unavailable(String),
}

/// Whole-ledger persistence. Every mutation writes the full snapshot.
pub trait ReservationStore: Send + Sync {
    fn load(&self) -> Result<LedgerSnapshot, StoreError>;
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;
}

/// Keeps the last saved snapshot in memory. Used by tests.
#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    snapshot: Mutex<LedgerSnapshot>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self { snapshot: Mutex::new(snapshot), ..Self::default() }
    }

    pub fn current(&self) -> LedgerSnapshot {
        self.snapshot.lock().map(|snapshot| snapshot.clone()).unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn load(&self) -> Result<LedgerSnapshot, StoreError> {
        Ok(self.current())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store set to fail".to_owned()));
        }

        let mut current = self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_owned()))?;
        *current = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
