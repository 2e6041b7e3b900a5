//! Tracks the delivery outcome of a message sent to many recipients.
//!
//! Feed every Original message, MDN and DSN (already normalised into a
//! `NotificationRecord`) to `Monitor::ingest`. Once every recipient of an
//! Original has either processed-and-dispatched it or failed, the `Monitor`
//! emits exactly one `CompletionEvent` for it, and ignores anything that
//! arrives about it afterwards.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailmonitor::{Config, Monitor, NotificationRecord};
//! use mailmonitor::storage::FileStorage;
//!
//! let storage = Arc::new(FileStorage::open("/var/lib/mailmonitor").unwrap());
//! let monitor = Monitor::new(
//!     Config::default(),
//!     storage.clone(),
//!     storage,
//!     |event: &mailmonitor::CompletionEvent| println!("{:?}", event),
//! ).unwrap();
//!
//! monitor.ingest(NotificationRecord::Original {
//!     id: "<1234@example.com>".to_owned(),
//!     recipients: vec!["someone@example.org".to_owned()],
//! }).unwrap();
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod address;
pub mod aggregation_state;
mod aggregator;
pub mod completion;
pub mod config;
pub mod error;
mod locks;
pub mod record;
pub mod recipient_status;
pub mod sink;
pub mod storage;
mod worker;

use std::convert::TryFrom;
use std::ops::Drop;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::aggregator::Aggregator;
use crate::storage::{CompletionLedger, CorrelationStore};
use crate::worker::{Message, Worker};

pub use crate::address::Address;
pub use crate::aggregation_state::AggregationState;
pub use crate::completion::{CompletionEvent, CompletionLedgerEntry, Outcome};
pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::record::{DeliveryAction, DispositionType, NotificationRecord, RawRecord};
pub use crate::recipient_status::{RecipientState, RecipientStatus};
pub use crate::sink::{ChannelSink, Sink};
pub use crate::worker::WorkerStatus;

pub struct Monitor<C, L, K>
where
    C: CorrelationStore + 'static,
    L: CompletionLedger + 'static,
    K: Sink + 'static,
{
    aggregator: Arc<Aggregator<C, L, K>>,
    sender: Mutex<Sender<Message>>,
    worker_status: Arc<RwLock<u8>>,
}

impl<C, L, K> Monitor<C, L, K>
where
    C: CorrelationStore + 'static,
    L: CompletionLedger + 'static,
    K: Sink + 'static,
{
    /// Create a new Monitor over the given correlation store and completion
    /// ledger, sending completion events to `sink`. State left in the store
    /// by a previous run is recovered.
    pub fn new(config: Config, store: C, ledger: L, sink: K) -> Result<Monitor<C, L, K>, Error> {
        if !config.is_valid() {
            return Err(Error::InvalidConfig);
        }

        let aggregator = Arc::new(Aggregator::new(config, store, ledger, sink));
        let orphan_deadlines = aggregator.recover()?;

        let (sender, receiver) = mpsc::channel();
        let worker_status = Arc::new(RwLock::new(WorkerStatus::Ok as u8));

        let mut worker = Worker::new(
            receiver,
            aggregator.clone(),
            worker_status.clone(),
            orphan_deadlines,
        );

        let _ = thread::spawn(move || {
            worker.run();
        });

        Ok(Monitor {
            aggregator,
            sender: Mutex::new(sender),
            worker_status,
        })
    }

    /// Apply one record. Safe to call from many threads at once; records for
    /// the same correlation id are applied one at a time.
    ///
    /// On `Err` nothing was changed, and the record may be delivered again.
    pub fn ingest(&self, record: NotificationRecord) -> Result<Outcome, Error> {
        let ingested = self.aggregator.ingest(&record)?;

        trace!(
            "{} for {}: {:?}",
            record.id(),
            record.correlation_id(),
            ingested.outcome
        );

        if let Some(deadline) = ingested.orphan_deadline {
            // The orphan is already stored; a dead worker only delays its expiry
            // until the next restart
            let sent = match self.sender.lock() {
                Ok(sender) => sender
                    .send(Message::OrphanSeen(
                        record.correlation_id().to_owned(),
                        deadline,
                    ))
                    .is_ok(),
                Err(_) => false,
            };
            if !sent {
                warn!(
                    "worker unavailable, orphan {} not scheduled for expiry",
                    record.correlation_id()
                );
            }
        }

        Ok(ingested.outcome)
    }

    /// Convert a loosely-typed record and apply it
    pub fn ingest_raw(&self, raw: RawRecord) -> Result<Outcome, Error> {
        self.ingest(NotificationRecord::try_from(raw)?)
    }

    /// The in-flight state for a correlation id. `None` once it completes.
    pub fn state(&self, correlation_id: &str) -> Result<Option<AggregationState>, Error> {
        self.aggregator.state(correlation_id)
    }

    pub fn is_completed(&self, correlation_id: &str) -> Result<bool, Error> {
        self.aggregator.is_completed(correlation_id)
    }

    /// Drop every orphan whose retention window has passed by `now`, as the
    /// worker does on its own. Returns the correlation ids dropped.
    pub fn expire_orphans_at(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<String>, Error> {
        self.aggregator.expire_orphans(now)
    }

    /// How many orphans have been dropped since this Monitor started
    pub fn orphans_expired(&self) -> u64 {
        self.aggregator.orphans_expired()
    }

    /// Ask the worker to die. This is not required, you can simply let the
    /// Monitor fall out of scope and it will clean itself up.
    pub fn die(&self) -> Result<(), Error> {
        let sender = self.sender.lock().map_err(|_| Error::LockPoisoned)?;
        sender.send(Message::Terminate)?;
        Ok(())
    }

    /// Determine the status of the worker
    pub fn worker_status(&self) -> WorkerStatus {
        match self.worker_status.read() {
            Ok(status) => WorkerStatus::from_u8(*status),
            Err(_) => WorkerStatus::LockPoisoned,
        }
    }
}

impl<C, L, K> Drop for Monitor<C, L, K>
where
    C: CorrelationStore + 'static,
    L: CompletionLedger + 'static,
    K: Sink + 'static,
{
    fn drop(&mut self) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(Message::Terminate);
        }
    }
}
