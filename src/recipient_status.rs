use crate::record::{DeliveryAction, DispositionType};

/// A notification about one recipient, as far as the state machine cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Disposition(DispositionType),
    Delivery(DeliveryAction),
}

/// Where a recipient stands, as reported in a `CompletionEvent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientState {
    /// Nothing conclusive yet. A lone Dispatched disposition leaves the
    /// recipient here.
    Pending,

    /// Processed has been seen, Dispatched has not
    ProcessedOnly,

    /// Both Processed and Dispatched have been seen, in either order
    Succeeded,

    /// An Error or Denied disposition, or a Failed delivery action
    Failed,
}

impl RecipientState {
    pub fn is_terminal(&self) -> bool {
        match *self {
            RecipientState::Succeeded | RecipientState::Failed => true,
            RecipientState::Pending | RecipientState::ProcessedOnly => false,
        }
    }
}

/// Per-Recipient notification history
///
/// The flags only ever go from false to true, and once `state()` is
/// terminal `advance()` leaves the status untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientStatus {
    pub processed: bool,
    pub dispatched: bool,
    pub failed: bool,
}

impl RecipientStatus {
    pub fn advance(self, signal: Signal) -> RecipientStatus {
        if self.state().is_terminal() {
            return self;
        }

        let mut next = self;
        match signal {
            Signal::Disposition(DispositionType::Processed) => next.processed = true,
            Signal::Disposition(DispositionType::Dispatched) => next.dispatched = true,
            Signal::Disposition(DispositionType::Error)
            | Signal::Disposition(DispositionType::Denied)
            | Signal::Delivery(DeliveryAction::Failed) => next.failed = true,
            Signal::Delivery(DeliveryAction::Delayed)
            | Signal::Delivery(DeliveryAction::Relayed)
            | Signal::Delivery(DeliveryAction::Delivered)
            | Signal::Delivery(DeliveryAction::Expanded) => {}
        }
        next
    }

    pub fn state(&self) -> RecipientState {
        if self.failed {
            RecipientState::Failed
        } else if self.processed && self.dispatched {
            RecipientState::Succeeded
        } else if self.processed {
            RecipientState::ProcessedOnly
        } else {
            RecipientState::Pending
        }
    }
}
