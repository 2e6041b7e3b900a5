use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::address::Address;
use crate::completion::CompletionEvent;

/// Where completion events (and orphan anomalies) go
pub trait Sink: Send + Sync {
    /// Called once per correlation id, after the completion has been
    /// durably recorded in the ledger
    fn completed(&self, event: &CompletionEvent);

    /// Called when notifications for a correlation id are dropped because
    /// the Original never arrived within the retention window
    fn orphan_expired(&self, _correlation_id: &str, _recipients: &[Address]) {}
}

impl<F> Sink for F
where
    F: Fn(&CompletionEvent) + Send + Sync,
{
    fn completed(&self, event: &CompletionEvent) {
        self(event)
    }
}

/// Forwards completion events down a channel
pub struct ChannelSink(Mutex<Sender<CompletionEvent>>);

impl ChannelSink {
    pub fn new(sender: Sender<CompletionEvent>) -> ChannelSink {
        ChannelSink(Mutex::new(sender))
    }
}

impl Sink for ChannelSink {
    fn completed(&self, event: &CompletionEvent) {
        let sender = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if sender.send(event.clone()).is_err() {
            warn!(
                "completion of {} not delivered: receiver is gone",
                event.correlation_id
            );
        }
    }
}
