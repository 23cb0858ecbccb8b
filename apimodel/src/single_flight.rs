//! Single-flight registry for detail fetches.
//!
//! When several callers ask for the same `(type, identity)` while a request
//! is outstanding, only the first (the leader) hits the network. The others
//! (followers) park a oneshot receiver in the waiter list and are released
//! with the leader's result.
//!
//! The entry is removed before waiters are notified, under the same lock
//! followers use to join, so a waiter is either in the list that gets
//! notified or arrives after removal and starts (or hits the cache) anew.
//!
//! Once the response is parsed the leader publishes the instance on the
//! entry. Callers that came in through [`InFlightRegistry::join`] get it
//! right then, or immediately if it is already published, instead of
//! waiting for the leader to resolve relations and settle. Relation fetches
//! join this way, so they only ever wait on the network and a cycle back to
//! an identity whose leader is still resolving never waits on itself.

use crate::entity::EntityRef;
use crate::error::Error;
use apimodel_types::EntityKey;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Failure shared with followers when the leader's fetch fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl From<&Error> for FlightFailure {
    fn from(e: &Error) -> Self {
        Self {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

/// What a follower receives.
pub type FlightResult = Result<EntityRef, FlightFailure>;

type Waiters = Vec<oneshot::Sender<FlightResult>>;

#[derive(Default)]
struct FlightEntry {
    // Released on settle.
    waiters: Waiters,
    // Released on publish, or on settle if nothing was published.
    joined: Waiters,
    fetched: Option<EntityRef>,
}

/// Result of joining the registry for one key.
pub enum Flight<'a> {
    /// No request was outstanding; the caller must fetch and settle.
    Leader(FlightGuard<'a>),
    /// A request is outstanding; await its result.
    Follower(oneshot::Receiver<FlightResult>),
    /// The leader has published the entity and is still resolving
    /// relations. Only returned by [`InFlightRegistry::join`].
    Fetched(EntityRef),
}

/// In-flight detail requests of one entity type.
#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<EntityKey, FlightEntry>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<EntityKey, FlightEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically becomes the leader for `key` or joins its waiter list.
    pub fn acquire(&self, key: EntityKey) -> Flight<'_> {
        self.enter(key, false)
    }

    /// Like [`acquire`](Self::acquire), but a follower is released as soon
    /// as the leader publishes, not when it settles.
    pub fn join(&self, key: EntityKey) -> Flight<'_> {
        self.enter(key, true)
    }

    fn enter(&self, key: EntityKey, take_fetched: bool) -> Flight<'_> {
        match self.entries().entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let flight = entry.get_mut();
                let (tx, rx) = oneshot::channel();
                if !take_fetched {
                    flight.waiters.push(tx);
                } else if let Some(entity) = &flight.fetched {
                    return Flight::Fetched(entity.clone());
                } else {
                    flight.joined.push(tx);
                }
                Flight::Follower(rx)
            }
            Entry::Vacant(entry) => {
                entry.insert(FlightEntry::default());
                Flight::Leader(FlightGuard {
                    registry: self,
                    key,
                    settled: false,
                })
            }
        }
    }

    /// Returns true while a request for `key` is outstanding.
    pub fn is_in_flight(&self, key: &EntityKey) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of followers parked on `key`.
    pub fn waiter_count(&self, key: &EntityKey) -> usize {
        self.entries()
            .get(key)
            .map_or(0, |entry| entry.waiters.len() + entry.joined.len())
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn take(&self, key: &EntityKey) -> Waiters {
        self.entries()
            .remove(key)
            .map(|mut entry| {
                entry.waiters.append(&mut entry.joined);
                entry.waiters
            })
            .unwrap_or_default()
    }

    fn publish(&self, key: &EntityKey, entity: &EntityRef) -> Waiters {
        match self.entries().get_mut(key) {
            Some(entry) => {
                entry.fetched = Some(entity.clone());
                std::mem::take(&mut entry.joined)
            }
            None => Waiters::new(),
        }
    }
}

impl fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

/// Held by the leader; removes the registry entry when settled or dropped.
///
/// Dropping an unsettled guard (the leader's future was cancelled) drops
/// every waiter's sender, which followers observe as an abandoned flight.
pub struct FlightGuard<'a> {
    registry: &'a InFlightRegistry,
    key: EntityKey,
    settled: bool,
}

impl FlightGuard<'_> {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Makes the parsed instance available to [`InFlightRegistry::join`]
    /// while the leader resolves relations, and releases callers that
    /// joined before it was published. Waiters from `acquire` keep waiting
    /// for [`settle`](Self::settle). Returns how many were released.
    pub fn publish(&self, entity: &EntityRef) -> usize {
        let joined = self.registry.publish(&self.key, entity);
        let released = joined.len();
        for tx in joined {
            let _ = tx.send(Ok(entity.clone()));
        }
        released
    }

    /// Removes the entry and releases every waiter with `result`.
    /// Returns how many waiters were released.
    pub fn settle(mut self, result: FlightResult) -> usize {
        self.settled = true;
        let waiters = self.registry.take(&self.key);
        let released = waiters.len();
        for tx in waiters {
            // A follower that gave up has dropped its receiver.
            let _ = tx.send(result.clone());
        }
        released
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.take(&self.key);
        }
    }
}
