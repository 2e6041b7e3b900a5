pub mod file_storage;
pub mod memory_storage;
pub use self::file_storage::FileStorage;
pub use self::memory_storage::MemoryStorage;

use std::sync::Arc;

use crate::aggregation_state::AggregationState;
use crate::completion::CompletionLedgerEntry;

pub trait StorageError: ::std::error::Error {}

/// A trait for implementing the durable map of in-flight correlations.
///
/// Methods take `&self` and may be called from many threads at once, but
/// never concurrently for the same correlation id. Writes must be durable
/// before they return.
pub trait CorrelationStore: Send + Sync {
    type Error: StorageError;

    /// Store an `AggregationState`. This should overwrite if the correlation
    /// id matches an existing state.
    fn store(&self, state: &AggregationState) -> Result<(), Self::Error>;

    /// Retrieve the `AggregationState` for a correlation id, if there is one
    fn retrieve(&self, correlation_id: &str) -> Result<Option<AggregationState>, Self::Error>;

    /// Remove the `AggregationState` for a correlation id. Removing one that
    /// is not there is not an error.
    fn remove(&self, correlation_id: &str) -> Result<(), Self::Error>;

    /// Retrieve every stored state. This is used at startup to recover
    /// orphan deadlines and to purge states that were already completed.
    fn retrieve_all(&self) -> Result<Vec<AggregationState>, Self::Error>;
}

/// A trait for implementing the durable set of completed correlation ids.
/// Entries are never removed by this crate.
pub trait CompletionLedger: Send + Sync {
    type Error: StorageError;

    /// Record a completion. Recording the same correlation id twice is not
    /// an error. Must be durable before it returns.
    fn record(&self, entry: &CompletionLedgerEntry) -> Result<(), Self::Error>;

    /// Whether a correlation id has been recorded as complete
    fn contains(&self, correlation_id: &str) -> Result<bool, Self::Error>;
}

impl<T: CorrelationStore + ?Sized> CorrelationStore for Arc<T> {
    type Error = T::Error;

    fn store(&self, state: &AggregationState) -> Result<(), Self::Error> {
        (**self).store(state)
    }

    fn retrieve(&self, correlation_id: &str) -> Result<Option<AggregationState>, Self::Error> {
        (**self).retrieve(correlation_id)
    }

    fn remove(&self, correlation_id: &str) -> Result<(), Self::Error> {
        (**self).remove(correlation_id)
    }

    fn retrieve_all(&self) -> Result<Vec<AggregationState>, Self::Error> {
        (**self).retrieve_all()
    }
}

impl<T: CompletionLedger + ?Sized> CompletionLedger for Arc<T> {
    type Error = T::Error;

    fn record(&self, entry: &CompletionLedgerEntry) -> Result<(), Self::Error> {
        (**self).record(entry)
    }

    fn contains(&self, correlation_id: &str) -> Result<bool, Self::Error> {
        (**self).contains(correlation_id)
    }
}
