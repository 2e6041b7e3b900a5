use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Error;

/// One mutex per correlation id, created on demand and dropped once nobody
/// holds or waits on it. Ingests for the same id are serialised; ingests
/// for different ids only meet briefly on the map itself.
#[derive(Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> KeyLocks {
        KeyLocks::default()
    }

    /// Run `f` while holding the lock for `key`
    pub fn with<T, F>(&self, key: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| Error::LockPoisoned)?;
            slots
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            // The slot guards no data, so a panic elsewhere leaves it usable
            let _guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };
        drop(slot);

        // Only the map's reference left means nobody holds or waits on it
        let mut slots = self.slots.lock().map_err(|_| Error::LockPoisoned)?;
        if slots.get(key).map(|s| Arc::strong_count(s) == 1).unwrap_or(false) {
            slots.remove(key);
        }

        result
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_key_is_serialised() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    locks
                        .with("orig-1", || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_error_releases_lock() {
        let locks = KeyLocks::new();
        let result: Result<(), Error> = locks.with("orig-1", || Err(Error::Send));
        assert!(result.is_err());
        assert_eq!(locks.len(), 0);
        assert_eq!(locks.with("orig-1", || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_waiters_release_their_slot() {
        let locks = Arc::new(KeyLocks::new());

        for round in 0..200 {
            let key = format!("orig-{}", round);
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let locks = locks.clone();
                    let key = key.clone();
                    thread::spawn(move || locks.with(&key, || Ok(())).unwrap())
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        }

        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_panic_does_not_poison_key() {
        let locks = Arc::new(KeyLocks::new());

        let panicked = {
            let locks = locks.clone();
            thread::spawn(move || {
                let _: Result<(), Error> = locks.with("orig-1", || panic!("boom"));
            })
            .join()
        };
        assert!(panicked.is_err());

        assert_eq!(locks.with("orig-1", || Ok(7)).unwrap(), 7);
        assert_eq!(locks.len(), 0);
    }
}
