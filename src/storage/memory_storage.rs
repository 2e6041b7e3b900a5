use crate::aggregation_state::AggregationState;
use crate::completion::CompletionLedgerEntry;
use crate::storage::{CompletionLedger, CorrelationStore, StorageError};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::RwLock;

#[derive(Debug)]
pub enum MemoryStorageError {
    LockPoisoned,
}
impl Error for MemoryStorageError {}
impl StorageError for MemoryStorageError {}

impl fmt::Display for MemoryStorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MemoryStorageError::LockPoisoned => write!(f, "Memory Storage Error: lock poisoned"),
        }
    }
}

/// Non-durable storage, for tests and for embedders who accept losing
/// in-flight state on restart. Serves as both the correlation store and the
/// completion ledger; share it between the two with an `Arc`.
#[derive(Default)]
pub struct MemoryStorage {
    states: RwLock<HashMap<String, AggregationState>>,
    ledger: RwLock<HashMap<String, CompletionLedgerEntry>>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }
}

impl CorrelationStore for MemoryStorage {
    type Error = MemoryStorageError;

    fn store(&self, state: &AggregationState) -> Result<(), MemoryStorageError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| MemoryStorageError::LockPoisoned)?;
        states.insert(state.correlation_id.clone(), state.clone());
        Ok(())
    }

    fn retrieve(&self, correlation_id: &str) -> Result<Option<AggregationState>, MemoryStorageError> {
        let states = self
            .states
            .read()
            .map_err(|_| MemoryStorageError::LockPoisoned)?;
        Ok(states.get(correlation_id).cloned())
    }

    fn remove(&self, correlation_id: &str) -> Result<(), MemoryStorageError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| MemoryStorageError::LockPoisoned)?;
        states.remove(correlation_id);
        Ok(())
    }

    fn retrieve_all(&self) -> Result<Vec<AggregationState>, MemoryStorageError> {
        let states = self
            .states
            .read()
            .map_err(|_| MemoryStorageError::LockPoisoned)?;
        Ok(states.values().cloned().collect())
    }
}

impl CompletionLedger for MemoryStorage {
    type Error = MemoryStorageError;

    fn record(&self, entry: &CompletionLedgerEntry) -> Result<(), MemoryStorageError> {
        let mut ledger = self
            .ledger
            .write()
            .map_err(|_| MemoryStorageError::LockPoisoned)?;
        ledger
            .entry(entry.correlation_id.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    fn contains(&self, correlation_id: &str) -> Result<bool, MemoryStorageError> {
        let ledger = self
            .ledger
            .read()
            .map_err(|_| MemoryStorageError::LockPoisoned)?;
        Ok(ledger.contains_key(correlation_id))
    }
}
