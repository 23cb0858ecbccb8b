//! Relation resolution.
//!
//! A relation maps one attribute of an entity to entities of a target
//! type. The raw attribute value is classified once into a
//! [`RelationValue`], from which a [`RelationManager`] derives its primary
//! keys and loads the related entities in batches:
//!
//! - [`RelationManager::resolve`] fetches the first `batch_size` keys
//!   concurrently and queues one deferred loader per remaining key
//! - [`RelationManager::next`] runs the next `batch_size` loaders
//! - [`RelationManager::all`] drains the queue
//!
//! Embedded records on a `nested` relation and live entity references are
//! materialized at construction without any fetch.

use crate::entity::EntityRef;
use crate::entity_type::EntityType;
use crate::error::{Error, Result};
use crate::options::ResolveOptions;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Declares a relation on an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    /// Name of the target entity type.
    pub to: String,
    /// Embedded records are complete entities; build them without fetching.
    pub nested: bool,
    /// Keys fetched per batch; falls back to the client default.
    pub batch_size: Option<usize>,
}

impl RelationSpec {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            to: target.into(),
            nested: false,
            batch_size: None,
        }
    }

    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Renders a scalar key as the string used for lookups.
pub(crate) fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// The raw value of a relation attribute, classified by shape.
#[derive(Clone)]
pub enum RelationValue {
    Empty,
    Scalar(String),
    ManyScalars(Vec<String>),
    EmbeddedRecord(Map<String, Value>),
    ManyEmbedded(Vec<Map<String, Value>>),
    LiveEntity(EntityRef),
    ManyLiveEntities(Vec<EntityRef>),
}

impl RelationValue {
    /// Classifies a wire value. Lists are classified by their first element.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => RelationValue::Empty,
            Value::Array(items) => match items.first() {
                Some(Value::Object(_)) => RelationValue::ManyEmbedded(
                    items.iter().filter_map(|v| v.as_object().cloned()).collect(),
                ),
                _ => RelationValue::ManyScalars(items.iter().filter_map(key_string).collect()),
            },
            Value::Object(map) => RelationValue::EmbeddedRecord(map.clone()),
            scalar => match key_string(scalar) {
                Some(key) => RelationValue::Scalar(key),
                None => RelationValue::Empty,
            },
        }
    }

    /// True for every list shape, including an empty list.
    pub fn is_many(&self) -> bool {
        matches!(
            self,
            RelationValue::ManyScalars(_)
                | RelationValue::ManyEmbedded(_)
                | RelationValue::ManyLiveEntities(_)
        )
    }

    /// Stringified identities, extracting `unique_key` from records.
    /// Records without that key contribute nothing.
    pub fn primary_keys(&self, unique_key: &str) -> Vec<String> {
        let record_key = |map: &Map<String, Value>| map.get(unique_key).and_then(key_string);
        match self {
            RelationValue::Empty => Vec::new(),
            RelationValue::Scalar(key) => vec![key.clone()],
            RelationValue::ManyScalars(keys) => keys.clone(),
            RelationValue::EmbeddedRecord(map) => record_key(map).into_iter().collect(),
            RelationValue::ManyEmbedded(maps) => maps.iter().filter_map(record_key).collect(),
            RelationValue::LiveEntity(entity) => entity.identity().into_iter().collect(),
            RelationValue::ManyLiveEntities(entities) => {
                entities.iter().filter_map(|e| e.identity()).collect()
            }
        }
    }
}

impl fmt::Debug for RelationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationValue::Empty => f.write_str("Empty"),
            RelationValue::Scalar(k) => f.debug_tuple("Scalar").field(k).finish(),
            RelationValue::ManyScalars(k) => f.debug_tuple("ManyScalars").field(k).finish(),
            RelationValue::EmbeddedRecord(m) => f.debug_tuple("EmbeddedRecord").field(m).finish(),
            RelationValue::ManyEmbedded(m) => f.debug_tuple("ManyEmbedded").field(m).finish(),
            RelationValue::LiveEntity(e) => f.debug_tuple("LiveEntity").field(&e.identity()).finish(),
            RelationValue::ManyLiveEntities(es) => f
                .debug_tuple("ManyLiveEntities")
                .field(&es.iter().map(|e| e.identity()).collect::<Vec<_>>())
                .finish(),
        }
    }
}

type LoadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<EntityRef>> + Send + Sync>;

/// A zero-argument loader for one not-yet-fetched key.
#[derive(Clone)]
struct DeferredLoader {
    key: String,
    load: LoadFn,
}

#[derive(Default)]
struct ManagerState {
    resolved: bool,
    deferred: VecDeque<DeferredLoader>,
    loaded: Vec<EntityRef>,
    by_key: HashMap<String, EntityRef>,
}

impl ManagerState {
    /// Entities without identity are loaded but not indexed.
    fn push(&mut self, key: Option<String>, entity: EntityRef) {
        if let Some(key) = key {
            self.by_key.insert(key, entity.clone());
        }
        self.loaded.push(entity);
    }
}

/// Resolves one relation attribute of one entity.
pub struct RelationManager {
    name: String,
    target: Arc<EntityType>,
    value: RelationValue,
    many: bool,
    primary_keys: Vec<String>,
    batch_size: usize,
    // Serializes resolve/next so loaders are never queued or run twice.
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<ManagerState>,
}

impl RelationManager {
    /// Builds a manager for `value` on relation `name`.
    ///
    /// Primary keys are derived here, once. Empty values, live entities and
    /// embedded records on a nested relation come out already resolved.
    pub fn new(
        name: impl Into<String>,
        spec: &RelationSpec,
        target: Arc<EntityType>,
        value: RelationValue,
        default_batch_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        let many = value.is_many();
        let primary_keys = value.primary_keys(target.unique_key());
        let batch_size = spec.batch_size.unwrap_or(default_batch_size).max(1);

        let mut state = ManagerState::default();
        match &value {
            RelationValue::LiveEntity(entity) => {
                check_type(&name, &target, entity)?;
                state.push(entity.identity(), entity.clone());
                state.resolved = true;
            }
            RelationValue::ManyLiveEntities(entities) => {
                for entity in entities {
                    check_type(&name, &target, entity)?;
                    state.push(entity.identity(), entity.clone());
                }
                state.resolved = true;
            }
            RelationValue::EmbeddedRecord(map) if spec.nested => {
                let entity = target.from_data(map.clone())?;
                state.push(entity.identity(), entity);
                state.resolved = true;
            }
            RelationValue::ManyEmbedded(maps) if spec.nested => {
                for map in maps {
                    let entity = target.from_data(map.clone())?;
                    state.push(entity.identity(), entity);
                }
                state.resolved = true;
            }
            _ => state.resolved = primary_keys.is_empty(),
        }

        Ok(Self {
            name,
            target,
            value,
            many,
            primary_keys,
            batch_size,
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The relation attribute this manager resolves.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Arc<EntityType> {
        &self.target
    }

    pub fn value(&self) -> &RelationValue {
        &self.value
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_resolved(&self) -> bool {
        self.state().resolved
    }

    /// Number of keys still waiting in the deferred queue.
    pub fn deferred_len(&self) -> usize {
        self.state().deferred.len()
    }

    pub fn loaded_len(&self) -> usize {
        self.state().loaded.len()
    }

    /// Loaded entity for one primary key.
    pub fn loaded(&self, key: &str) -> Option<EntityRef> {
        self.state().by_key.get(key).cloned()
    }

    fn unresolved(&self) -> Error {
        Error::Attribute(format!(
            "relation {} is not resolved; call resolve(), next() or all() first",
            self.name
        ))
    }

    /// Every loaded entity, in discovery order.
    pub fn entities(&self) -> Result<Vec<EntityRef>> {
        let state = self.state();
        if !state.resolved {
            return Err(self.unresolved());
        }
        Ok(state.loaded.clone())
    }

    /// The single related entity; `None` for an empty relation.
    pub fn entity(&self) -> Result<Option<EntityRef>> {
        let state = self.state();
        if !state.resolved {
            return Err(self.unresolved());
        }
        Ok(state.loaded.first().cloned())
    }

    /// Fetches one related entity by identity.
    pub async fn get_one(&self, id: &str, opts: &ResolveOptions) -> Result<EntityRef> {
        fetch_one(&self.target, &self.name, id, opts.use_cache).await
    }

    fn loader(&self, key: &str, use_cache: bool) -> DeferredLoader {
        let target = self.target.clone();
        let name = self.name.clone();
        let id = key.to_string();
        DeferredLoader {
            key: key.to_string(),
            load: Arc::new(move || {
                let target = target.clone();
                let name = name.clone();
                let id = id.clone();
                async move { fetch_one(&target, &name, &id, use_cache).await }.boxed()
            }),
        }
    }

    // Caller holds op_lock.
    async fn resolve_first_batch(&self, opts: &ResolveOptions) -> Result<Vec<EntityRef>> {
        if self.is_resolved() {
            return Ok(Vec::new());
        }

        let split = self.batch_size.min(self.primary_keys.len());
        let (batch, rest) = self.primary_keys.split_at(split);
        debug!(
            relation = %self.name,
            target = %self.target.name(),
            fetching = batch.len(),
            deferred = rest.len(),
            "resolving relation"
        );

        let fetched = try_join_all(batch.iter().map(|id| self.get_one(id, opts))).await?;

        let mut state = self.state();
        for (key, entity) in batch.iter().zip(fetched.iter()) {
            state.push(Some(key.clone()), entity.clone());
        }
        state.deferred = rest
            .iter()
            .map(|key| self.loader(key, opts.use_cache))
            .collect();
        state.resolved = true;
        Ok(fetched)
    }

    async fn descend(&self, entities: &[EntityRef], opts: &ResolveOptions) -> Result<()> {
        if opts.deep {
            try_join_all(entities.iter().map(|e| e.resolve_relations(opts))).await?;
        }
        Ok(())
    }

    /// Loads the first batch and queues the rest.
    ///
    /// Returns every entity loaded so far, which is not every related
    /// entity when there are more keys than `batch_size`.
    pub async fn resolve(&self, opts: &ResolveOptions) -> Result<Vec<EntityRef>> {
        {
            let _op = self.op_lock.lock().await;
            self.resolve_first_batch(opts).await?;
        }
        let loaded = self.entities()?;
        self.descend(&loaded, opts).await?;
        Ok(loaded)
    }

    /// Loads the next batch of deferred keys and returns them.
    ///
    /// On an unresolved manager this is [`resolve`](Self::resolve). A batch
    /// that fails goes back to the front of the queue.
    pub async fn next(&self, opts: &ResolveOptions) -> Result<Vec<EntityRef>> {
        let op = self.op_lock.lock().await;
        if !self.is_resolved() {
            drop(op);
            return self.resolve(opts).await;
        }

        let batch: Vec<DeferredLoader> = {
            let mut state = self.state();
            let n = self.batch_size.min(state.deferred.len());
            state.deferred.drain(..n).collect()
        };
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        debug!(relation = %self.name, fetching = batch.len(), "loading deferred batch");

        let fetched = match try_join_all(batch.iter().map(|loader| (loader.load)())).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let mut state = self.state();
                for loader in batch.into_iter().rev() {
                    state.deferred.push_front(loader);
                }
                return Err(e);
            }
        };

        {
            let mut state = self.state();
            for (loader, entity) in batch.iter().zip(fetched.iter()) {
                state.push(Some(loader.key.clone()), entity.clone());
            }
        }
        drop(op);

        self.descend(&fetched, opts).await?;
        Ok(fetched)
    }

    /// Drains the deferred queue and returns every related entity.
    pub async fn all(&self, opts: &ResolveOptions) -> Result<Vec<EntityRef>> {
        if !self.is_resolved() {
            self.resolve(opts).await?;
        }
        while self.deferred_len() > 0 {
            self.next(opts).await?;
        }
        self.entities()
    }
}

impl fmt::Debug for RelationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("RelationManager")
            .field("name", &self.name)
            .field("target", &self.target.name())
            .field("many", &self.many)
            .field("primary_keys", &self.primary_keys)
            .field("batch_size", &self.batch_size)
            .field("resolved", &state.resolved)
            .field("loaded", &state.loaded.len())
            .field("deferred", &state.deferred.len())
            .finish()
    }
}

fn check_type(relation: &str, target: &EntityType, entity: &EntityRef) -> Result<()> {
    let actual = entity.entity_type().name();
    if actual != target.name() {
        return Err(Error::RelationTypeMismatch {
            relation: relation.to_string(),
            expected: target.name().to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

async fn fetch_one(
    target: &Arc<EntityType>,
    relation: &str,
    id: &str,
    use_cache: bool,
) -> Result<EntityRef> {
    let entity = target.related(id, use_cache).await?;
    check_type(relation, target, &entity)?;
    Ok(entity)
}
