//! Per-type entity cache with lazy expiry.
//!
//! Each [`EntityType`](crate::EntityType) owns one [`EntityCache`]. Entries
//! carry an absolute expiry computed from the type's [`CacheMaxAge`] and the
//! injected [`Clock`]. A stale entry is evicted when a lookup or refresh
//! finds it; there is no background sweep. A disabled cache (max age zero
//! or below) stores nothing.

use crate::entity::EntityRef;
use apimodel_types::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How long a cached entity stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMaxAge {
    /// Valid for this many seconds. Zero or negative means every entry is
    /// stale as soon as it is written.
    Seconds(i64),
    /// Never expires.
    Forever,
}

impl CacheMaxAge {
    /// Absolute expiry for an entry written at `now_ms`; `None` never expires.
    pub fn expires_at(&self, now_ms: i64) -> Option<i64> {
        match self {
            CacheMaxAge::Seconds(secs) => Some(now_ms.saturating_add(secs.saturating_mul(1000))),
            CacheMaxAge::Forever => None,
        }
    }

    /// Returns true when entries can never be served.
    pub fn is_disabled(&self) -> bool {
        matches!(self, CacheMaxAge::Seconds(secs) if *secs <= 0)
    }
}

/// One cached entity and its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub entity: EntityRef,
    /// Epoch milliseconds after which the entry is stale; `None` never expires.
    pub expires_at_ms: Option<i64>,
}

impl CacheEntry {
    /// Returns true if the entry is still valid at `now_ms`.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|at| at > now_ms)
    }
}

/// Identity → entity map for one entity type.
#[derive(Debug)]
pub struct EntityCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_age: CacheMaxAge,
    clock: Arc<dyn Clock>,
}

impl EntityCache {
    /// Creates an empty cache.
    pub fn new(max_age: CacheMaxAge, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_age(&self) -> CacheMaxAge {
        self.max_age
    }

    /// Returns the cached entity if present and unexpired.
    pub fn get(&self, id: &str) -> Option<EntityRef> {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        match entries.get(id) {
            Some(entry) if entry.is_fresh(now) => Some(entry.entity.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    /// Returns the raw entry, stale or not.
    pub fn peek(&self, id: &str) -> Option<CacheEntry> {
        self.entries().get(id).cloned()
    }

    /// Writes `entity` under `id` with a fresh expiry, replacing any entry.
    /// Does nothing when the cache is disabled.
    pub fn insert(&self, id: impl Into<String>, entity: EntityRef) {
        if self.max_age.is_disabled() {
            return;
        }
        let entry = CacheEntry {
            entity,
            expires_at_ms: self.max_age.expires_at(self.clock.now_ms()),
        };
        self.entries().insert(id.into(), entry);
    }

    /// Extends an unexpired entry's expiry and returns its entity.
    ///
    /// A stale entry is evicted and treated as absent.
    pub fn refresh(&self, id: &str) -> Option<EntityRef> {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        let entry = entries.get_mut(id)?;
        if !entry.is_fresh(now) {
            entries.remove(id);
            return None;
        }
        entry.expires_at_ms = self.max_age.expires_at(now);
        Some(entry.entity.clone())
    }

    pub fn remove(&self, id: &str) -> Option<EntityRef> {
        self.entries().remove(id).map(|entry| entry.entity)
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of entries, including stale ones not yet looked up.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
