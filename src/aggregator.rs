use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::aggregation_state::AggregationState;
use crate::completion::{CompletionLedgerEntry, Outcome};
use crate::config::Config;
use crate::error::Error;
use crate::locks::KeyLocks;
use crate::record::NotificationRecord;
use crate::recipient_status::Signal;
use crate::sink::Sink;
use crate::storage::{CompletionLedger, CorrelationStore};

/// The result of one ingest, plus the deadline of any orphan it created so
/// the worker can schedule its expiry
pub(crate) struct Ingested {
    pub outcome: Outcome,
    pub orphan_deadline: Option<DateTime<Utc>>,
}

impl Ingested {
    fn closed() -> Ingested {
        Ingested {
            outcome: Outcome::IgnoredClosed,
            orphan_deadline: None,
        }
    }

    fn settled(outcome: Outcome) -> Ingested {
        Ingested {
            outcome,
            orphan_deadline: None,
        }
    }
}

/// Correlates notification records with their Original and declares each
/// Original complete exactly once.
///
/// Every read-modify-write for a correlation id happens under that id's
/// lock, so the ledger check, the state update and the completion decision
/// are atomic with respect to other ingests of the same id.
pub(crate) struct Aggregator<C, L, K> {
    config: Config,
    store: C,
    ledger: L,
    sink: K,
    locks: KeyLocks,

    // Orphaned correlation ids and when they were first seen
    orphans: Mutex<HashMap<String, DateTime<Utc>>>,

    orphans_expired: AtomicU64,
}

impl<C, L, K> Aggregator<C, L, K>
where
    C: CorrelationStore,
    L: CompletionLedger,
    K: Sink,
{
    pub fn new(config: Config, store: C, ledger: L, sink: K) -> Aggregator<C, L, K> {
        Aggregator {
            config,
            store,
            ledger,
            sink,
            locks: KeyLocks::new(),
            orphans: Mutex::new(HashMap::new()),
            orphans_expired: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Purge states that were completed but not removed (a crash between the
    /// ledger write and the removal), and index the orphans. Returns the
    /// orphan deadlines.
    pub fn recover(&self) -> Result<Vec<(String, DateTime<Utc>)>, Error> {
        let mut deadlines = Vec::new();
        let mut orphans = self.orphans.lock().map_err(|_| Error::LockPoisoned)?;

        for state in self.store.retrieve_all()? {
            if self.ledger.contains(&state.correlation_id)? {
                info!(
                    "purging leftover state for completed {}",
                    state.correlation_id
                );
                self.store.remove(&state.correlation_id)?;
            } else if state.is_orphan() {
                deadlines.push((
                    state.correlation_id.clone(),
                    state.first_seen + self.config.orphan_retention(),
                ));
                orphans.insert(state.correlation_id, state.first_seen);
            }
        }

        if !deadlines.is_empty() {
            info!("recovered {} orphaned correlations", deadlines.len());
        }
        Ok(deadlines)
    }

    pub fn ingest(&self, record: &NotificationRecord) -> Result<Ingested, Error> {
        record.check()?;
        let recipients = record
            .recipients()
            .iter()
            .map(|r| Address::parse(r))
            .collect::<Result<Vec<Address>, Error>>()?;
        let correlation_id = record.correlation_id();

        let ingested = self.locks.with(correlation_id, || match *record {
            NotificationRecord::Original { .. } => self.ingest_original(correlation_id, recipients),
            NotificationRecord::Disposition { disposition, .. } => self.ingest_notification(
                correlation_id,
                &recipients,
                Signal::Disposition(disposition),
            ),
            NotificationRecord::DeliveryStatus { action, .. } => self.ingest_notification(
                correlation_id,
                &recipients,
                Signal::Delivery(action),
            ),
        })?;

        // Outside the lock: the ledger already closes this id, whatever the
        // sink does
        if let Outcome::Completed(ref event) = ingested.outcome {
            self.sink.completed(event);
        }
        Ok(ingested)
    }

    fn ingest_original(
        &self,
        correlation_id: &str,
        recipients: Vec<Address>,
    ) -> Result<Ingested, Error> {
        if self.ledger.contains(correlation_id)? {
            debug!("Original {} replayed after completion", correlation_id);
            return Ok(Ingested::closed());
        }

        let (mut state, was_orphan) = match self.store.retrieve(correlation_id)? {
            Some(ref state) if !state.is_orphan() => {
                debug!("duplicate Original {} ignored", correlation_id);
                return Ok(Ingested::settled(Outcome::Pending));
            }
            Some(state) => (state, true),
            None => (AggregationState::new(correlation_id, Utc::now()), false),
        };

        let expected: BTreeSet<Address> = recipients.into_iter().collect();
        trace!(
            "Original {} expects {} recipients",
            correlation_id,
            expected.len()
        );
        state.set_expected(expected);

        let outcome = self.settle(state, false)?;
        if was_orphan {
            debug!("orphan {} adopted by its Original", correlation_id);
            self.forget_orphan(correlation_id);
        }
        Ok(Ingested::settled(outcome))
    }

    fn ingest_notification(
        &self,
        correlation_id: &str,
        recipients: &[Address],
        signal: Signal,
    ) -> Result<Ingested, Error> {
        if self.ledger.contains(correlation_id)? {
            debug!(
                "{:?} for completed {} ignored",
                signal, correlation_id
            );
            return Ok(Ingested::closed());
        }

        let now = Utc::now();
        let (mut state, new_orphan) = match self.store.retrieve(correlation_id)? {
            Some(state) => (state, false),
            None => (AggregationState::new(correlation_id, now), true),
        };
        let was_complete = state.is_complete();

        if state.is_orphan() {
            let distinct: BTreeSet<&Address> = state
                .recipient_status
                .keys()
                .chain(recipients.iter())
                .collect();
            if distinct.len() > self.config.max_orphan_recipients {
                return Err(Error::OrphanBufferFull(format!(
                    "{} would track {} recipients before its Original arrives",
                    correlation_id,
                    distinct.len()
                )));
            }
        }

        if new_orphan {
            self.reserve_orphan(correlation_id, now)?;
        }

        for addr in recipients {
            if !state.apply(addr, signal) {
                debug!("{} is not a recipient of {}, ignored", addr, correlation_id);
            }
        }

        match self.settle(state, was_complete) {
            Ok(outcome) => {
                let orphan_deadline = if new_orphan {
                    info!(
                        "{:?} for {} arrived before its Original; holding it",
                        signal, correlation_id
                    );
                    Some(now + self.config.orphan_retention())
                } else {
                    None
                };
                Ok(Ingested {
                    outcome,
                    orphan_deadline,
                })
            }
            Err(e) => {
                if new_orphan {
                    self.forget_orphan(correlation_id);
                }
                Err(e)
            }
        }
    }

    // Persist the state, or if it is now complete, close it out
    fn settle(&self, state: AggregationState, was_complete: bool) -> Result<Outcome, Error> {
        if was_complete {
            error!(
                "{} was already complete but not in the ledger; not declaring it again",
                state.correlation_id
            );
            return Ok(Outcome::IgnoredClosed);
        }

        if !state.is_complete() {
            self.store.store(&state)?;
            return Ok(Outcome::Pending);
        }

        let completed_at = Utc::now();
        self.ledger.record(&CompletionLedgerEntry {
            correlation_id: state.correlation_id.clone(),
            completed_at,
        })?;

        // The ledger now gates this id, so a failed removal only leaves an
        // unreachable state behind, purged by the next recover()
        if let Err(e) = self.store.remove(&state.correlation_id) {
            warn!(
                "completed {} but could not remove its state: {}",
                state.correlation_id, e
            );
        }

        let event = state.as_completion_event(completed_at);
        info!(
            "{} complete: {} recipients, {} failed",
            event.correlation_id,
            event.final_status.len(),
            event.failed_recipients().len()
        );
        Ok(Outcome::Completed(event))
    }

    fn reserve_orphan(&self, correlation_id: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let mut orphans = self.orphans.lock().map_err(|_| Error::LockPoisoned)?;
        if orphans.len() >= self.config.max_orphan_correlations {
            return Err(Error::OrphanBufferFull(format!(
                "already holding {} correlations without an Original",
                orphans.len()
            )));
        }
        orphans.insert(correlation_id.to_owned(), now);
        Ok(())
    }

    fn forget_orphan(&self, correlation_id: &str) {
        match self.orphans.lock() {
            Ok(mut orphans) => {
                orphans.remove(correlation_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(correlation_id);
            }
        }
    }

    /// Drop every orphan whose retention window has passed by `now`.
    /// Returns the correlation ids dropped.
    pub fn expire_orphans(&self, now: DateTime<Utc>) -> Result<Vec<String>, Error> {
        let retention = self.config.orphan_retention();
        let due: Vec<String> = {
            let orphans = self.orphans.lock().map_err(|_| Error::LockPoisoned)?;
            orphans
                .iter()
                .filter(|&(_, first_seen)| *first_seen + retention <= now)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut expired = Vec::new();
        for correlation_id in due {
            if self.expire_orphan(&correlation_id, now)? {
                expired.push(correlation_id);
            }
        }
        Ok(expired)
    }

    /// Drop one orphan if its retention window has passed by `now`. Returns
    /// false if it is not (or no longer) an orphan, or is not yet due.
    pub fn expire_orphan(&self, correlation_id: &str, now: DateTime<Utc>) -> Result<bool, Error> {
        let dropped = self.locks.with(correlation_id, || {
            let state = match self.store.retrieve(correlation_id)? {
                Some(ref state) if state.is_orphan() => state.clone(),
                _ => {
                    self.forget_orphan(correlation_id);
                    return Ok(None);
                }
            };
            if state.first_seen + self.config.orphan_retention() > now {
                return Ok(None);
            }

            self.store.remove(correlation_id)?;
            self.forget_orphan(correlation_id);
            self.orphans_expired.fetch_add(1, Ordering::SeqCst);

            let recipients: Vec<Address> = state.recipient_status.keys().cloned().collect();
            warn!(
                "dropping notifications for {} ({} recipients): no Original since {}",
                correlation_id,
                recipients.len(),
                state.first_seen
            );
            Ok(Some(recipients))
        })?;

        match dropped {
            Some(recipients) => {
                self.sink.orphan_expired(correlation_id, &recipients);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// When a held orphan is due to be dropped
    pub fn orphan_deadline(&self, correlation_id: &str) -> Option<DateTime<Utc>> {
        let orphans = self.orphans.lock().ok()?;
        orphans
            .get(correlation_id)
            .map(|first_seen| *first_seen + self.config.orphan_retention())
    }

    pub fn orphans_expired(&self) -> u64 {
        self.orphans_expired.load(Ordering::SeqCst)
    }

    pub fn state(&self, correlation_id: &str) -> Result<Option<AggregationState>, Error> {
        Ok(self.store.retrieve(correlation_id)?)
    }

    pub fn is_completed(&self, correlation_id: &str) -> Result<bool, Error> {
        Ok(self.ledger.contains(correlation_id)?)
    }
}
