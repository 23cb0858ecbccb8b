//! Identifier types for entity types and entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one entity type definition.
///
/// Two definitions never share an id, even when they carry the same name
/// or one was derived from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTypeId(u64);

impl EntityTypeId {
    /// Allocates a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Composite identity of one entity: its type and its unique-key value.
///
/// Used as the single-flight key. Equality is structural over both parts,
/// so no pair of distinct `(type, identity)` values can collide the way a
/// concatenated string key could.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    type_id: EntityTypeId,
    identity: String,
}

impl EntityKey {
    /// Creates a key from its parts.
    pub fn new(type_id: EntityTypeId, identity: impl Into<String>) -> Self {
        Self {
            type_id,
            identity: identity.into(),
        }
    }

    /// Returns the entity type part.
    #[must_use]
    pub const fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    /// Returns the identity part.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_id, self.identity)
    }
}
