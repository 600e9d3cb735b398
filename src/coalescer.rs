// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stampede coalescer.
//!
//! A process-local map from cache key to the single in-progress load for
//! that key. The first caller in becomes the leader and runs the load;
//! everyone else joins and awaits the leader's outcome, value or error
//! alike. The leader's slot is removed before the outcome is broadcast,
//! so a caller arriving after completion re-checks storage instead of
//! observing a finished load.
//!
//! Coalescing is strictly intra-process; engines sharing a backend do not
//! coordinate loads.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::CacheError;

/// Outcome shared between a leader and its joiners.
pub(crate) type LoadOutcome = Result<Value, CacheError>;

type Slot = watch::Receiver<Option<LoadOutcome>>;

/// Process-local map of in-progress loads, keyed by prefixed cache key.
#[derive(Default)]
pub(crate) struct Coalescer {
    in_flight: DashMap<String, Slot>,
}

/// What a caller got when entering the coalescer.
pub(crate) enum Ticket<'a> {
    /// This caller runs the load and must call [`LoadGuard::complete`].
    Leader(LoadGuard<'a>),
    /// Another caller is already loading; await its outcome.
    Joiner(Slot),
}

impl Coalescer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Atomically register a new load or join the existing one.
    pub(crate) fn enter(&self, cache_key: &str) -> Ticket<'_> {
        match self.in_flight.entry(cache_key.to_string()) {
            Entry::Occupied(occupied) => Ticket::Joiner(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                Ticket::Leader(LoadGuard {
                    coalescer: self,
                    cache_key: cache_key.to_string(),
                    tx,
                    completed: false,
                })
            }
        }
    }

    /// Number of loads currently in flight. Test hook.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.in_flight.len()
    }

    fn release(&self, cache_key: &str) {
        self.in_flight.remove(cache_key);
    }
}

/// Leader's handle on its coalescer slot.
///
/// Dropping the guard without completing releases the slot and fails any
/// joiners, so a cancelled leader cannot strand them.
pub(crate) struct LoadGuard<'a> {
    coalescer: &'a Coalescer,
    cache_key: String,
    tx: watch::Sender<Option<LoadOutcome>>,
    completed: bool,
}

impl LoadGuard<'_> {
    /// Release the slot, then broadcast the outcome to joiners.
    pub(crate) fn complete(mut self, outcome: &LoadOutcome) {
        self.completed = true;
        self.coalescer.release(&self.cache_key);
        let _ = self.tx.send(Some(outcome.clone()));
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.coalescer.release(&self.cache_key);
            let _ = self.tx.send(Some(Err(CacheError::Loader(
                "load was interrupted before completion".to_string(),
            ))));
        }
    }
}

/// Await the leader's outcome from a joined slot.
pub(crate) async fn await_outcome(mut slot: Slot) -> LoadOutcome {
    loop {
        {
            let seen = slot.borrow_and_update();
            if let Some(outcome) = seen.as_ref() {
                return outcome.clone();
            }
        }
        if slot.changed().await.is_err() {
            // Sender dropped without broadcasting.
            return Err(CacheError::Loader(
                "load was interrupted before completion".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_leader_then_joiner() {
        let coalescer = Coalescer::new();

        let Ticket::Leader(guard) = coalescer.enter("qc:k") else {
            panic!("first caller must lead");
        };
        assert_eq!(coalescer.len(), 1);

        let Ticket::Joiner(slot) = coalescer.enter("qc:k") else {
            panic!("second caller must join");
        };

        guard.complete(&Ok(json!(1)));
        assert_eq!(coalescer.len(), 0);
        assert_eq!(await_outcome(slot).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_released_before_broadcast() {
        // After completion the key is free again: a late caller leads a
        // fresh load rather than observing the finished one.
        let coalescer = Coalescer::new();
        let Ticket::Leader(guard) = coalescer.enter("qc:k") else {
            panic!("first caller must lead");
        };
        guard.complete(&Ok(json!(1)));

        assert!(matches!(coalescer.enter("qc:k"), Ticket::Leader(_)));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coalescer = Coalescer::new();
        let _a = coalescer.enter("qc:a");
        assert!(matches!(coalescer.enter("qc:b"), Ticket::Leader(_)));
    }

    #[tokio::test]
    async fn test_joiners_observe_error() {
        let coalescer = Arc::new(Coalescer::new());
        let Ticket::Leader(guard) = coalescer.enter("qc:k") else {
            panic!("first caller must lead");
        };

        let mut joiners = Vec::new();
        for _ in 0..3 {
            let Ticket::Joiner(slot) = coalescer.enter("qc:k") else {
                panic!("must join");
            };
            joiners.push(tokio::spawn(await_outcome(slot)));
        }

        let err = CacheError::Loader("db unreachable".to_string());
        guard.complete(&Err(err.clone()));

        for joiner in joiners {
            assert_eq!(joiner.await.unwrap().unwrap_err(), err);
        }
    }

    #[tokio::test]
    async fn test_dropped_leader_fails_joiners() {
        let coalescer = Coalescer::new();
        let Ticket::Leader(guard) = coalescer.enter("qc:k") else {
            panic!("first caller must lead");
        };
        let Ticket::Joiner(slot) = coalescer.enter("qc:k") else {
            panic!("must join");
        };

        drop(guard);

        assert!(await_outcome(slot).await.is_err());
        assert_eq!(coalescer.len(), 0);
    }

    #[tokio::test]
    async fn test_joiner_arriving_mid_flight() {
        let coalescer = Arc::new(Coalescer::new());
        let inner = coalescer.clone();

        let Ticket::Leader(guard) = coalescer.enter("qc:k") else {
            panic!("first caller must lead");
        };

        let joiner = tokio::spawn(async move {
            let Ticket::Joiner(slot) = inner.enter("qc:k") else {
                panic!("must join");
            };
            await_outcome(slot).await
        });

        // Give the joiner a moment to subscribe before completing.
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.complete(&Ok(json!({"count": 1})));

        assert_eq!(joiner.await.unwrap().unwrap(), json!({"count": 1}));
    }
}
