//! Entities and attribute wiring.
//!
//! An [`Entity`] keeps the raw wire value of every attribute (what the
//! server sent or what will be sent back), the subset changed since it was
//! built or last saved, and one [`RelationManager`] per relation attribute.
//! Relation attributes are read through their manager; everything else is
//! plain JSON.

use crate::entity_type::{into_object, EntityType};
use crate::error::{Error, Result, ValidationError};
use crate::options::{ResolveOptions, SaveOptions};
use crate::relation::{key_string, RelationManager, RelationSpec, RelationValue};
use apimodel_transport::{Method, Request};
use apimodel_types::EntityKey;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Shared handle to an entity. Cached entities are handed out by reference.
pub type EntityRef = Arc<Entity>;

/// What [`Entity::get`] found at a path.
#[derive(Debug, Clone)]
pub enum Attribute {
    /// Plain JSON.
    Value(Value),
    /// An unresolved relation, or a resolved to-many relation.
    Relation(Arc<RelationManager>),
    /// A resolved to-one relation.
    Entity(EntityRef),
    /// A dotted path mapped over a to-many relation.
    Many(Vec<Attribute>),
}

impl Attribute {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attribute::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Attribute::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Arc<RelationManager>> {
        match self {
            Attribute::Relation(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::Many(items) => Some(items),
            _ => None,
        }
    }

    /// Collapses to JSON: entities become their wire form, managers their raw value.
    pub fn to_value(&self) -> Value {
        match self {
            Attribute::Value(v) => v.clone(),
            Attribute::Relation(m) => m
                .entities()
                .map(|es| Value::Array(es.iter().map(|e| e.to_json()).collect()))
                .unwrap_or(Value::Null),
            Attribute::Entity(e) => e.to_json(),
            Attribute::Many(items) => Value::Array(items.iter().map(Attribute::to_value).collect()),
        }
    }
}

/// A value accepted by [`Entity::set`].
#[derive(Debug, Clone)]
pub enum AttrInput {
    Json(Value),
    Entity(EntityRef),
    Entities(Vec<EntityRef>),
}

impl From<Value> for AttrInput {
    fn from(v: Value) -> Self {
        AttrInput::Json(v)
    }
}

impl From<EntityRef> for AttrInput {
    fn from(e: EntityRef) -> Self {
        AttrInput::Entity(e)
    }
}

impl From<&EntityRef> for AttrInput {
    fn from(e: &EntityRef) -> Self {
        AttrInput::Entity(e.clone())
    }
}

impl From<Vec<EntityRef>> for AttrInput {
    fn from(es: Vec<EntityRef>) -> Self {
        AttrInput::Entities(es)
    }
}

impl From<&str> for AttrInput {
    fn from(s: &str) -> Self {
        AttrInput::Json(Value::from(s))
    }
}

impl From<String> for AttrInput {
    fn from(s: String) -> Self {
        AttrInput::Json(Value::from(s))
    }
}

macro_rules! json_input {
    ($($t:ty),*) => {
        $(impl From<$t> for AttrInput {
            fn from(v: $t) -> Self {
                AttrInput::Json(Value::from(v))
            }
        })*
    };
}

json_input!(i32, i64, u32, u64, f64);

impl From<bool> for AttrInput {
    fn from(b: bool) -> Self {
        AttrInput::Json(Value::from(b))
    }
}

#[derive(Debug, Default)]
struct EntityState {
    /// Wire value of every attribute, relations included.
    internal: Map<String, Value>,
    /// Wire values set since construction or the last save.
    changes: Map<String, Value>,
    relations: BTreeMap<String, Arc<RelationManager>>,
}

/// One record of an [`EntityType`].
pub struct Entity {
    entity_type: Arc<EntityType>,
    state: RwLock<EntityState>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Entity")
            .field("type", &self.entity_type.name())
            .field("attributes", &state.internal)
            .field("changes", &state.changes.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

fn traverse(value: &Value, path: &str) -> Option<Value> {
    path.split('.')
        .try_fold(value, |v, segment| match v {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
}

/// Resolved to-one relations read as their entity; anything else as the manager.
fn promote(manager: Arc<RelationManager>) -> Result<Attribute> {
    if manager.is_resolved() && !manager.is_many() {
        return Ok(match manager.entity()? {
            Some(entity) => Attribute::Entity(entity),
            None => Attribute::Value(Value::Null),
        });
    }
    Ok(Attribute::Relation(manager))
}

impl Entity {
    pub(crate) fn empty(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            state: RwLock::new(EntityState::default()),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, EntityState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Stringified value of the unique key; `None` for a new entity.
    pub fn identity(&self) -> Option<String> {
        self.state()
            .internal
            .get(self.entity_type.unique_key())
            .and_then(key_string)
    }

    pub fn is_new(&self) -> bool {
        self.identity().is_none()
    }

    /// Typed identity across entity types.
    pub fn key(&self) -> Option<EntityKey> {
        self.identity().map(|id| self.entity_type.key(&id))
    }

    /// The unique-key value as sent on the wire.
    pub(crate) fn wire_ref(&self) -> Value {
        self.state()
            .internal
            .get(self.entity_type.unique_key())
            .cloned()
            .unwrap_or(Value::Null)
    }

    // ── Reading ──────────────────────────────────────────────────

    /// Reads an attribute by name or dotted path.
    ///
    /// The head of the path is a local attribute. The rest is forwarded to
    /// the related entity of a resolved relation (to every loaded entity of
    /// a to-many one), or looked up by key in a plain JSON value. Walking
    /// through an unresolved relation is an [`Error::Attribute`].
    pub fn get(&self, path: &str) -> Result<Option<Attribute>> {
        let (head, rest) = split_path(path);

        let (manager, value) = {
            let state = self.state();
            (state.relations.get(head).cloned(), state.internal.get(head).cloned())
        };

        if let Some(manager) = manager {
            let Some(rest) = rest else {
                return promote(manager).map(Some);
            };
            if !manager.is_resolved() {
                return Err(Error::Attribute(format!(
                    "cannot read {path}: relation {head} is not resolved"
                )));
            }
            if manager.is_many() {
                let items = manager
                    .entities()?
                    .iter()
                    .map(|e| Ok(e.get(rest)?.unwrap_or(Attribute::Value(Value::Null))))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Some(Attribute::Many(items)));
            }
            return match manager.entity()? {
                Some(entity) => entity.get(rest),
                None => Ok(None),
            };
        }

        Ok(match (value, rest) {
            (None, _) => None,
            (Some(v), None) => Some(Attribute::Value(v)),
            (Some(v), Some(rest)) => traverse(&v, rest).map(Attribute::Value),
        })
    }

    /// Plain JSON value of one attribute; relations give their wire value.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.state().internal.get(name).cloned()
    }

    /// Like [`get`](Self::get), resolving relations along the path first
    /// when the plain read cannot see through them.
    pub async fn get_resolved(self: &Arc<Self>, path: &str) -> Result<Option<Attribute>> {
        let needs_resolve = match self.get(path) {
            Err(e) if e.is_attribute() => true,
            Ok(Some(Attribute::Relation(m))) => !m.is_resolved(),
            other => return other,
        };
        if needs_resolve {
            debug!(entity_type = %self.entity_type.name(), path, "resolving path");
            self.resolve_path(path, ResolveOptions::new()).await?;
        }
        self.get(path)
    }

    fn resolve_path(self: &Arc<Self>, path: &str, opts: ResolveOptions) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        let path = path.to_string();
        async move {
            let (head, rest) = split_path(&path);
            let Some(manager) = this.relation(head) else {
                return Ok(());
            };
            if !manager.is_resolved() {
                manager.resolve(&opts).await?;
            }
            if let Some(rest) = rest {
                let entities = manager.entities()?;
                try_join_all(entities.iter().map(|e| e.resolve_path(rest, opts.clone()))).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Every attribute, relations read as by [`get`](Self::get).
    pub fn attributes(&self) -> Result<BTreeMap<String, Attribute>> {
        let (internal, relations) = {
            let state = self.state();
            (state.internal.clone(), state.relations.clone())
        };
        internal
            .into_iter()
            .map(|(name, value)| {
                let attr = match relations.get(&name) {
                    Some(manager) => promote(manager.clone())?,
                    None => Attribute::Value(value),
                };
                Ok((name, attr))
            })
            .collect()
    }

    pub fn relation(&self, name: &str) -> Option<Arc<RelationManager>> {
        self.state().relations.get(name).cloned()
    }

    pub fn relation_managers(&self) -> Vec<Arc<RelationManager>> {
        self.state().relations.values().cloned().collect()
    }

    /// Wire values changed since construction or the last save.
    pub fn changes(&self) -> Map<String, Value> {
        self.state().changes.clone()
    }

    pub fn has_changes(&self) -> bool {
        !self.state().changes.is_empty()
    }

    pub fn clear_changes(&self) {
        self.state_mut().changes.clear();
    }

    /// Wire form of every attribute. Feeding it back to
    /// [`EntityType::from_data`] gives an equal entity.
    pub fn to_json(&self) -> Value {
        Value::Object(self.state().internal.clone())
    }

    // ── Writing ──────────────────────────────────────────────────

    /// Sets one attribute and records the change.
    ///
    /// Setting a relation always replaces its manager with a fresh one
    /// built from the new value. Entities set on a relation must be of the
    /// target type.
    pub fn set(&self, name: &str, value: impl Into<AttrInput>) -> Result<()> {
        match value.into() {
            AttrInput::Json(v) => self.store_wire(name, v, true),
            AttrInput::Entity(entity) => match self.entity_type.relation(name) {
                Some(spec) => {
                    let wire = entity.wire_ref();
                    let manager = self.build_manager(name, spec, RelationValue::LiveEntity(entity))?;
                    self.store(name, wire, Some(manager), true);
                    Ok(())
                }
                None => self.store_wire(name, entity.to_json(), true),
            },
            AttrInput::Entities(entities) => match self.entity_type.relation(name) {
                Some(spec) => {
                    let wire = Value::Array(entities.iter().map(|e| e.wire_ref()).collect());
                    let value = RelationValue::ManyLiveEntities(entities);
                    let manager = self.build_manager(name, spec, value)?;
                    self.store(name, wire, Some(manager), true);
                    Ok(())
                }
                None => {
                    let wire = Value::Array(entities.iter().map(|e| e.to_json()).collect());
                    self.store_wire(name, wire, true)
                }
            },
        }
    }

    fn build_manager(
        &self,
        name: &str,
        spec: &RelationSpec,
        value: RelationValue,
    ) -> Result<Arc<RelationManager>> {
        let target = self.entity_type.target(name)?;
        let manager =
            RelationManager::new(name, spec, target, value, self.entity_type.default_batch_size())?;
        Ok(Arc::new(manager))
    }

    /// Stores a wire value, wiring a relation manager when `name` is a relation.
    pub(crate) fn store_wire(&self, name: &str, value: Value, track: bool) -> Result<()> {
        let manager = match self.entity_type.relation(name) {
            Some(spec) => Some(self.build_manager(name, spec, RelationValue::from_json(&value))?),
            None => None,
        };
        self.store(name, value, manager, track);
        Ok(())
    }

    fn store(&self, name: &str, wire: Value, manager: Option<Arc<RelationManager>>, track: bool) {
        let mut state = self.state_mut();
        if track {
            state.changes.insert(name.to_string(), wire.clone());
        }
        state.internal.insert(name.to_string(), wire);
        match manager {
            Some(manager) => state.relations.insert(name.to_string(), manager),
            None => state.relations.remove(name),
        };
    }

    pub(crate) fn apply_defaults(&self) -> Result<()> {
        for (name, default) in self.entity_type.defaults() {
            if self.state().internal.contains_key(name) {
                continue;
            }
            self.store_wire(name, default.produce(), false)?;
        }
        Ok(())
    }

    /// Takes server data without recording changes. Relations whose wire
    /// value is unchanged keep their manager and whatever it loaded.
    fn absorb(&self, data: Map<String, Value>) -> Result<()> {
        for (name, value) in data {
            if self.state().internal.get(&name) == Some(&value) {
                continue;
            }
            self.store_wire(&name, value, false)?;
        }
        Ok(())
    }

    /// Copies `other`'s wire attributes onto this instance in place.
    ///
    /// Unchanged relations keep their manager; changed ones take `other`'s.
    pub(crate) fn merge_from(&self, other: &Entity) -> Result<()> {
        let (internal, relations) = {
            let state = other.state();
            (state.internal.clone(), state.relations.clone())
        };
        let mut state = self.state_mut();
        for (name, value) in internal {
            if state.internal.get(&name) == Some(&value) {
                continue;
            }
            match relations.get(&name) {
                Some(manager) => state.relations.insert(name.clone(), manager.clone()),
                None => state.relations.remove(&name),
            };
            state.internal.insert(name, value);
        }
        Ok(())
    }

    // ── Validation and persistence ───────────────────────────────

    /// Runs every validator and reports all failures at once.
    pub fn validate(&self) -> Result<()> {
        let internal = self.state().internal.clone();
        let errors: Vec<ValidationError> = self
            .entity_type
            .validators()
            .iter()
            .flat_map(|(field, validators)| {
                let value = internal.get(field).cloned().unwrap_or(Value::Null);
                validators
                    .iter()
                    .filter_map(move |check| check(&value).err())
                    .map(move |message| ValidationError::new(field.clone(), message))
                    .collect::<Vec<_>>()
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    fn writable(&self, mut body: Map<String, Value>) -> Map<String, Value> {
        if let Some(fields) = self.entity_type.fields() {
            body.retain(|name, _| fields.iter().any(|f| f == name));
        }
        body
    }

    /// Sends this entity to the server.
    ///
    /// New entities are `POST`ed with every writable attribute. Persisted
    /// ones send their changes with `PATCH`, or everything with `PUT` when
    /// `full` is set; with no changes and no `full` nothing is sent. The
    /// response is absorbed, changes are cleared and the cache refreshed.
    /// Returns the cached instance, which is this one unless another
    /// instance with the same identity was already cached.
    pub async fn save(self: &Arc<Self>, opts: SaveOptions) -> Result<EntityRef> {
        if !opts.force {
            self.validate()?;
        }
        let client = self.entity_type.client()?;

        let request = match self.identity() {
            None => {
                let body = self.writable(into_object(self.to_json())?);
                Request::new(Method::Post, self.entity_type.list_path(&opts.params)?)
                    .with_body(Value::Object(body))
            }
            Some(id) => {
                let path = self.entity_type.detail_path(&id, &opts.params)?;
                if opts.full {
                    let body = self.writable(into_object(self.to_json())?);
                    Request::new(Method::Put, path).with_body(Value::Object(body))
                } else {
                    let changes = self.changes();
                    if changes.is_empty() {
                        debug!(entity_type = %self.entity_type.name(), id, "nothing to save");
                        return Ok(self.clone());
                    }
                    Request::new(Method::Patch, path).with_body(Value::Object(self.writable(changes)))
                }
            }
        };

        let method = request.method;
        let response = client.transport().send(request).await?;
        if let Value::Object(data) = response.data {
            self.absorb(data)?;
        }
        self.clear_changes();
        info!(entity_type = %self.entity_type.name(), id = ?self.identity(), %method, "saved");

        if self.is_new() {
            return Ok(self.clone());
        }
        self.entity_type.cache_resource(self, true)
    }

    /// Deletes this entity on the server and drops it from the cache.
    pub async fn destroy(&self) -> Result<()> {
        self.destroy_with(&Map::new()).await
    }

    /// [`destroy`](Self::destroy) against a templated endpoint.
    pub async fn destroy_with(&self, params: &Map<String, Value>) -> Result<()> {
        let id = self.identity().ok_or_else(|| {
            Error::NotPersisted(format!("cannot delete a new {}", self.entity_type.name()))
        })?;
        let client = self.entity_type.client()?;
        let path = self.entity_type.detail_path(&id, params)?;
        client.transport().delete(&path).await?;
        self.entity_type.uncache(&id);
        info!(entity_type = %self.entity_type.name(), id, "destroyed");
        Ok(())
    }

    // ── Relations ────────────────────────────────────────────────

    /// Resolves the first batch of every relation, recursing through loaded
    /// entities when `opts.deep` is set. Entities already visited by this
    /// call are skipped, so cyclic graphs terminate.
    pub fn resolve_relations(self: &Arc<Self>, opts: &ResolveOptions) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        let opts = opts.clone();
        async move {
            if !opts.visit(&this) {
                return Ok(());
            }
            let managers = this.relation_managers();
            try_join_all(managers.iter().map(|m| m.resolve(&opts))).await?;
            Ok(())
        }
        .boxed()
    }
}
