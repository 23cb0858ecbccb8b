//! Per-call options for fetches, saves and relation resolution.

use crate::entity::Entity;
use apimodel_types::EntityKey;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Options for [`EntityType::detail`](crate::EntityType::detail).
#[derive(Debug, Clone)]
pub struct DetailOptions {
    /// Serve an unexpired cached instance without touching the network.
    pub use_cache: bool,
    /// Resolve the first batch of every relation of the fetched entity.
    pub resolve_related: bool,
    /// Resolve relations recursively through the loaded entities.
    pub resolve_related_deep: bool,
    /// Values for `{placeholders}` in the endpoint template.
    pub params: Map<String, Value>,
}

impl Default for DetailOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            resolve_related: false,
            resolve_related_deep: false,
            params: Map::new(),
        }
    }
}

impl DetailOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn resolve_related(mut self) -> Self {
        self.resolve_related = true;
        self
    }

    pub fn resolve_related_deep(mut self) -> Self {
        self.resolve_related_deep = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub(crate) fn wants_relations(&self) -> bool {
        self.resolve_related || self.resolve_related_deep
    }

    pub(crate) fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            use_cache: self.use_cache,
            deep: self.resolve_related_deep,
            ..ResolveOptions::default()
        }
    }
}

/// Options for [`EntityType::list`](crate::EntityType::list).
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Encoded into the querystring.
    pub query: Map<String, Value>,
    /// Values for `{placeholders}` in the endpoint template.
    pub params: Map<String, Value>,
    pub resolve_related: bool,
    pub resolve_related_deep: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn resolve_related(mut self) -> Self {
        self.resolve_related = true;
        self
    }

    pub fn resolve_related_deep(mut self) -> Self {
        self.resolve_related_deep = true;
        self
    }

    pub(crate) fn wants_relations(&self) -> bool {
        self.resolve_related || self.resolve_related_deep
    }

    pub(crate) fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            deep: self.resolve_related_deep,
            ..ResolveOptions::default()
        }
    }
}

/// Options for [`Entity::save`](crate::Entity::save).
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Save even when validators fail.
    pub force: bool,
    /// Send every attribute with `PUT` instead of the changes with `PATCH`.
    pub full: bool,
    /// Values for `{placeholders}` in the endpoint template.
    pub params: Map<String, Value>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn full(mut self) -> Self {
        self.full = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Entities already visited by one top-level resolution.
#[derive(Debug, Clone, Default)]
struct Visited(Arc<Mutex<HashSet<EntityKey>>>);

/// Options for relation resolution.
///
/// Cloning shares the visited set, so one top-level call and everything it
/// recurses into see the same set. Build a fresh value per top-level call.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub use_cache: bool,
    /// Recurse into the relations of every loaded entity.
    pub deep: bool,
    visited: Visited,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            deep: false,
            visited: Visited::default(),
        }
    }
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for recursive resolution.
    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Marks `entity` visited; false if it already was.
    ///
    /// Entities without identity are keyed by address.
    pub(crate) fn visit(&self, entity: &Entity) -> bool {
        let key = entity.key().unwrap_or_else(|| {
            EntityKey::new(
                entity.entity_type().id(),
                format!("@{:p}", entity as *const Entity),
            )
        });
        self.visited
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }
}
