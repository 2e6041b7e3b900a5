use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::recipient_status::RecipientState;

/// Emitted exactly once per Original, when every recipient has reached a
/// terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub correlation_id: String,
    pub expected_recipients: BTreeSet<Address>,
    pub final_status: BTreeMap<Address, RecipientState>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionEvent {
    /// Whether every recipient processed and dispatched the message
    pub fn succeeded(&self) -> bool {
        self.final_status
            .values()
            .all(|s| *s == RecipientState::Succeeded)
    }

    pub fn failed_recipients(&self) -> Vec<&Address> {
        self.final_status
            .iter()
            .filter(|&(_, s)| *s == RecipientState::Failed)
            .map(|(addr, _)| addr)
            .collect()
    }
}

/// A record in the ledger of completed correlation ids. This is exposed
/// publicly for implementers of `CompletionLedger`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionLedgerEntry {
    pub correlation_id: String,
    pub completed_at: DateTime<Utc>,
}

/// What `Monitor::ingest` did with a record
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The correlation id is already complete; the record changed nothing
    IgnoredClosed,

    /// The record was applied and the message is still waiting on
    /// recipients (or on its Original)
    Pending,

    /// The record completed the message
    Completed(CompletionEvent),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        match *self {
            Outcome::Completed(_) => true,
            _ => false,
        }
    }
}
