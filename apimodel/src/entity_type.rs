//! Entity type descriptors and their fetch coordination.
//!
//! An [`EntityType`] names an endpoint, its identity attribute, its cache
//! policy, defaults, validators and relations. Every type owns its own
//! [`EntityCache`] and [`InFlightRegistry`], allocated when the type is
//! built; a type derived with [`EntityTypeBuilder::extend`] copies the
//! configuration of its base but never its cache or registry.
//!
//! # Detail fetches
//!
//! [`EntityType::detail`] serves unexpired cache hits without the network.
//! On a miss the first caller for an identity becomes the leader and issues
//! the request; concurrent callers for the same identity wait for the
//! leader's result instead of issuing their own. The leader caches the
//! entity and releases everyone with the same instance; each caller then
//! resolves relations per its own options. A failed fetch rejects the leader with the original error and
//! every waiter with [`Error::InFlightFailed`].

use crate::cache::{CacheMaxAge, EntityCache};
use crate::client::EntityClient;
use crate::entity::{Entity, EntityRef};
use crate::error::{Error, Result};
use crate::list::ListResponse;
use crate::options::{DetailOptions, ListOptions};
use crate::relation::RelationSpec;
use crate::single_flight::{Flight, FlightFailure, InFlightRegistry};
use apimodel_transport::query;
use apimodel_types::{Clock, EntityKey, EntityTypeId, SystemClock};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Checks one attribute value; `Err` carries the message.
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Default for a missing attribute.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    /// Called once per constructed entity.
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Builds an [`EntityType`].
#[derive(Clone)]
pub struct EntityTypeBuilder {
    name: String,
    endpoint: String,
    unique_key: String,
    cache_max_age: Option<CacheMaxAge>,
    defaults: BTreeMap<String, DefaultValue>,
    relations: BTreeMap<String, RelationSpec>,
    fields: Option<Vec<String>>,
    validators: BTreeMap<String, Vec<Validator>>,
}

impl EntityTypeBuilder {
    /// Starts a type named `name` served at `endpoint`.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            unique_key: "id".to_string(),
            cache_max_age: None,
            defaults: BTreeMap::new(),
            relations: BTreeMap::new(),
            fields: None,
            validators: BTreeMap::new(),
        }
    }

    /// Starts a type that inherits `base`'s configuration under a new name.
    pub fn extend(base: &EntityType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: base.endpoint.clone(),
            unique_key: base.unique_key.clone(),
            cache_max_age: Some(base.cache_max_age()),
            defaults: base.defaults.clone(),
            relations: base.relations.clone(),
            fields: base.fields.clone(),
            validators: base.validators.clone(),
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = key.into();
        self
    }

    pub fn cache_max_age(mut self, max_age: CacheMaxAge) -> Self {
        self.cache_max_age = Some(max_age);
        self
    }

    pub fn cache_max_age_secs(self, secs: i64) -> Self {
        self.cache_max_age(CacheMaxAge::Seconds(secs))
    }

    pub fn cache_forever(self) -> Self {
        self.cache_max_age(CacheMaxAge::Forever)
    }

    pub fn default_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults
            .insert(name.into(), DefaultValue::Value(value.into()));
        self
    }

    pub fn default_with<F>(mut self, name: impl Into<String>, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.defaults
            .insert(name.into(), DefaultValue::Producer(Arc::new(producer)));
        self
    }

    pub fn relation(mut self, name: impl Into<String>, spec: RelationSpec) -> Self {
        self.relations.insert(name.into(), spec);
        self
    }

    /// Restricts writes to these attributes.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator<F>(mut self, name: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validators
            .entry(name.into())
            .or_default()
            .push(Arc::new(validator));
        self
    }

    /// Builds a type bound to no client.
    ///
    /// Anything that needs the network or a relation target fails with
    /// [`Error::ImproperlyConfigured`]; the cache works.
    pub fn build(self) -> Arc<EntityType> {
        self.build_with(Weak::new(), Arc::new(SystemClock), 60, 20)
    }

    pub(crate) fn build_with(
        self,
        client: Weak<EntityClient>,
        clock: Arc<dyn Clock>,
        default_max_age_secs: i64,
        default_batch_size: usize,
    ) -> Arc<EntityType> {
        let max_age = self
            .cache_max_age
            .unwrap_or(CacheMaxAge::Seconds(default_max_age_secs));
        Arc::new(EntityType {
            id: EntityTypeId::next(),
            name: self.name,
            endpoint: self.endpoint,
            unique_key: self.unique_key,
            defaults: self.defaults,
            relations: self.relations,
            fields: self.fields,
            validators: self.validators,
            default_batch_size: default_batch_size.max(1),
            client,
            cache: EntityCache::new(max_age, clock),
            in_flight: InFlightRegistry::new(),
        })
    }
}

/// Descriptor of one kind of entity, with its own cache.
pub struct EntityType {
    id: EntityTypeId,
    name: String,
    endpoint: String,
    unique_key: String,
    defaults: BTreeMap<String, DefaultValue>,
    relations: BTreeMap<String, RelationSpec>,
    fields: Option<Vec<String>>,
    validators: BTreeMap<String, Vec<Validator>>,
    default_batch_size: usize,
    client: Weak<EntityClient>,
    cache: EntityCache,
    in_flight: InFlightRegistry,
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("unique_key", &self.unique_key)
            .field("cache_max_age", &self.cache.max_age())
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}

impl EntityType {
    pub fn id(&self) -> EntityTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    pub fn cache_max_age(&self) -> CacheMaxAge {
        self.cache.max_age()
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationSpec> {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.get(name)
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub(crate) fn defaults(&self) -> &BTreeMap<String, DefaultValue> {
        &self.defaults
    }

    pub(crate) fn validators(&self) -> &BTreeMap<String, Vec<Validator>> {
        &self.validators
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Single-flight key of one identity of this type.
    pub fn key(&self, id: &str) -> EntityKey {
        EntityKey::new(self.id, id)
    }

    /// The client this type is registered with.
    pub fn client(&self) -> Result<Arc<EntityClient>> {
        self.client.upgrade().ok_or_else(|| {
            Error::ImproperlyConfigured(format!(
                "entity type {} is not registered with a client",
                self.name
            ))
        })
    }

    /// The registered target type of relation `name`.
    pub fn target(&self, name: &str) -> Result<Arc<EntityType>> {
        let spec = self.relation(name).ok_or_else(|| {
            Error::ImproperlyConfigured(format!("{} has no relation {}", self.name, name))
        })?;
        self.client()?.entity_type(&spec.to)
    }

    pub(crate) fn default_batch_size(&self) -> usize {
        self.default_batch_size
    }

    // ── Paths ────────────────────────────────────────────────────

    /// Endpoint with `{placeholders}` filled.
    pub fn list_path(&self, params: &Map<String, Value>) -> Result<String> {
        Ok(query::interpolate(&self.endpoint, params)?)
    }

    /// `<endpoint>/<id>`.
    pub fn detail_path(&self, id: &str, params: &Map<String, Value>) -> Result<String> {
        Ok(query::detail_path(&self.list_path(params)?, id))
    }

    // ── Construction ─────────────────────────────────────────────

    /// Builds a new, unsaved entity. Every given attribute counts as a change.
    pub fn create(self: &Arc<Self>, attributes: Value) -> Result<EntityRef> {
        let attributes = into_object(attributes)?;
        let entity = Arc::new(Entity::empty(self.clone()));
        for (name, value) in attributes {
            entity.set(&name, value)?;
        }
        entity.apply_defaults()?;
        Ok(entity)
    }

    /// Builds an entity from server data. Nothing counts as a change.
    pub fn from_data(self: &Arc<Self>, data: Map<String, Value>) -> Result<EntityRef> {
        let entity = Arc::new(Entity::empty(self.clone()));
        for (name, value) in data {
            entity.store_wire(&name, value, false)?;
        }
        entity.apply_defaults()?;
        Ok(entity)
    }

    // ── Cache ────────────────────────────────────────────────────

    /// Returns the cached entity if present and unexpired.
    pub fn get_cached(&self, id: &str) -> Option<EntityRef> {
        self.cache.get(id)
    }

    /// Writes `entity` into the cache and returns the cached instance.
    ///
    /// With `replace`, an unexpired entry is updated in place so earlier
    /// holders of the cached instance see the new attributes; without one
    /// this falls back to a plain insert.
    pub fn cache_resource(&self, entity: &EntityRef, replace: bool) -> Result<EntityRef> {
        let id = self.identity_of(entity)?;
        if replace {
            match self.replace_cache(entity) {
                Ok(cached) => return Ok(cached),
                Err(Error::Cache(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.cache.insert(id, entity.clone());
        Ok(entity.clone())
    }

    /// Merges `entity` into the unexpired cache entry and refreshes its expiry.
    ///
    /// Fails with [`Error::Cache`] if no fresh entry exists under its identity.
    pub fn replace_cache(&self, entity: &EntityRef) -> Result<EntityRef> {
        let id = self.identity_of(entity)?;
        let cached = self.cache.refresh(&id).ok_or_else(|| {
            Error::Cache(format!("no cached {} with {} = {}", self.name, self.unique_key, id))
        })?;
        if !Arc::ptr_eq(&cached, entity) {
            cached.merge_from(entity)?;
        }
        Ok(cached)
    }

    /// Empties this type's cache. Other types, derived ones included, keep theirs.
    pub fn clear_cache(&self) {
        debug!(entity_type = %self.name, "clearing cache");
        self.cache.clear();
    }

    /// Drops one identity from the cache.
    pub fn uncache(&self, id: &str) -> Option<EntityRef> {
        self.cache.remove(id)
    }

    fn identity_of(&self, entity: &Entity) -> Result<String> {
        entity.identity().ok_or_else(|| {
            Error::Cache(format!(
                "cannot cache {} without a value for {}",
                self.name, self.unique_key
            ))
        })
    }

    // ── Fetching ─────────────────────────────────────────────────

    /// Fetches one entity, at most one request per identity at a time.
    ///
    /// Concurrent callers share the leader's request. They are released
    /// after the leader has resolved relations per its own options, then
    /// resolve per theirs on the same instance.
    pub async fn detail(self: &Arc<Self>, id: &str, opts: DetailOptions) -> Result<EntityRef> {
        self.detail_with(id, opts, false).await
    }

    /// Detail fetch made while resolving a relation.
    ///
    /// Takes an instance whose leader is still resolving relations instead
    /// of waiting for it, so cyclic graphs never wait on themselves.
    pub(crate) async fn related(self: &Arc<Self>, id: &str, use_cache: bool) -> Result<EntityRef> {
        let opts = DetailOptions {
            use_cache,
            ..DetailOptions::default()
        };
        self.detail_with(id, opts, true).await
    }

    async fn detail_with(
        self: &Arc<Self>,
        id: &str,
        opts: DetailOptions,
        take_fetched: bool,
    ) -> Result<EntityRef> {
        if opts.use_cache {
            if let Some(entity) = self.get_cached(id) {
                debug!(entity_type = %self.name, id, "cache hit");
                self.resolve_for(&entity, &opts).await?;
                return Ok(entity);
            }
        }

        let flight = if take_fetched {
            self.in_flight.join(self.key(id))
        } else {
            self.in_flight.acquire(self.key(id))
        };
        match flight {
            Flight::Fetched(entity) => {
                debug!(entity_type = %self.name, id, "taking entity from in-flight fetch");
                Ok(entity)
            }
            Flight::Follower(rx) => {
                debug!(entity_type = %self.name, id, "joining in-flight fetch");
                let key = self.key(id).to_string();
                let entity = match rx.await {
                    Ok(Ok(entity)) => entity,
                    Ok(Err(FlightFailure { status, message })) => {
                        return Err(Error::InFlightFailed { key, status, message });
                    }
                    Err(_) => return Err(Error::InFlightAbandoned { key }),
                };
                self.resolve_for(&entity, &opts).await?;
                Ok(entity)
            }
            Flight::Leader(guard) => {
                debug!(entity_type = %self.name, id, "fetching");
                let entity = match self.fetch_detail(id, &opts).await {
                    Ok(entity) => entity,
                    Err(e) => {
                        warn!(entity_type = %self.name, id, error = %e, "fetch failed");
                        guard.settle(Err(FlightFailure::from(&e)));
                        return Err(e);
                    }
                };
                let joined = guard.publish(&entity);
                if joined > 0 {
                    debug!(entity_type = %self.name, id, joined, "handed out fetched entity");
                }
                // Waiters get the fetched entity even if these relations fail.
                let resolved = self.resolve_for(&entity, &opts).await;
                let released = guard.settle(Ok(entity.clone()));
                if released > 0 {
                    debug!(entity_type = %self.name, id, waiters = released, "released waiters");
                }
                resolved.map(|()| entity)
            }
        }
    }

    async fn fetch_detail(self: &Arc<Self>, id: &str, opts: &DetailOptions) -> Result<EntityRef> {
        let client = self.client()?;
        let path = self.detail_path(id, &opts.params)?;
        let response = client.transport().get(&path).await?;

        let fetched = self.from_data(into_object(response.data)?)?;
        self.cache_resource(&fetched, true)
    }

    async fn resolve_for(&self, entity: &EntityRef, opts: &DetailOptions) -> Result<()> {
        if opts.wants_relations() {
            entity.resolve_relations(&opts.resolve_options()).await?;
        }
        Ok(())
    }

    /// Fetches one page of entities.
    ///
    /// List results are not cached; only detail fetches and saves are.
    pub async fn list(self: &Arc<Self>, opts: ListOptions) -> Result<ListResponse> {
        let client = self.client()?;
        let path = query::with_query(&self.list_path(&opts.params)?, &opts.query);
        debug!(entity_type = %self.name, %path, "listing");
        let response = client.transport().get(&path).await?;

        let items = match &response.data {
            Value::Array(items) => items.clone(),
            other => {
                return Err(Error::Decode(format!(
                    "expected a list of {} but got {}",
                    self.name,
                    kind(other)
                )));
            }
        };

        let entities = items
            .into_iter()
            .map(|item| self.from_data(into_object(item)?))
            .collect::<Result<Vec<_>>>()?;

        if opts.wants_relations() {
            let resolve = opts.resolve_options();
            try_join_all(entities.iter().map(|e| e.resolve_relations(&resolve))).await?;
        }

        Ok(ListResponse { entities, response })
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Decode(format!("expected an object but got {}", kind(&other)))),
    }
}
