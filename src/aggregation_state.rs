use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::completion::CompletionEvent;
use crate::recipient_status::{RecipientStatus, Signal};

/// The in-flight correlation record for one Original message. This is
/// exposed publicly for implementers of `CorrelationStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationState {
    /// The Original record's message id
    pub correlation_id: String,

    /// The recipients of the Original. If this is None the Original has not
    /// arrived yet, and this state is an orphan holding early notifications.
    pub expected_recipients: Option<BTreeSet<Address>>,

    /// What has been heard from each recipient so far
    pub recipient_status: BTreeMap<Address, RecipientStatus>,

    /// When the first record for this correlation id was accepted
    pub first_seen: DateTime<Utc>,
}

impl AggregationState {
    pub fn new(correlation_id: &str, now: DateTime<Utc>) -> AggregationState {
        AggregationState {
            correlation_id: correlation_id.to_owned(),
            expected_recipients: None,
            recipient_status: BTreeMap::new(),
            first_seen: now,
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.expected_recipients.is_none()
    }

    /// Fix the expected recipients from the Original. Anything heard from
    /// addresses outside that set is discarded.
    pub fn set_expected(&mut self, recipients: BTreeSet<Address>) {
        self.recipient_status
            .retain(|addr, _| recipients.contains(addr));
        self.expected_recipients = Some(recipients);
    }

    /// Whether a signal for `addr` would be recorded
    pub fn accepts(&self, addr: &Address) -> bool {
        match self.expected_recipients {
            Some(ref expected) => expected.contains(addr),
            None => true,
        }
    }

    /// Apply a signal for one recipient. Returns false (and changes nothing)
    /// if the address is not one of the expected recipients.
    pub fn apply(&mut self, addr: &Address, signal: Signal) -> bool {
        if !self.accepts(addr) {
            return false;
        }
        let status = self.recipient_status.entry(addr.clone()).or_default();
        *status = status.advance(signal);
        true
    }

    /// True once every expected recipient has reached a terminal state.
    /// Never true for an orphan.
    pub fn is_complete(&self) -> bool {
        match self.expected_recipients {
            None => false,
            Some(ref expected) => expected.iter().all(|addr| {
                self.recipient_status
                    .get(addr)
                    .map(|s| s.state().is_terminal())
                    .unwrap_or(false)
            }),
        }
    }

    pub fn as_completion_event(&self, completed_at: DateTime<Utc>) -> CompletionEvent {
        let expected = self.expected_recipients.clone().unwrap_or_default();
        let final_status = expected
            .iter()
            .map(|addr| {
                let status = self.recipient_status.get(addr).cloned().unwrap_or_default();
                (addr.clone(), status.state())
            })
            .collect();

        CompletionEvent {
            correlation_id: self.correlation_id.clone(),
            expected_recipients: expected,
            final_status,
            completed_at,
        }
    }
}
