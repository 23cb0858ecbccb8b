//! The client that owns a transport and a registry of entity types.

use crate::config::ClientConfig;
use crate::entity::EntityRef;
use crate::entity_type::{EntityType, EntityTypeBuilder};
use crate::error::{Error, Result};
use crate::list::ListResponse;
use crate::options::{DetailOptions, ListOptions};
use apimodel_transport::{HttpTransport, Transport};
use apimodel_types::{Clock, SystemClock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Binds entity types to a transport.
///
/// Types are registered by name; relations name their target type and are
/// looked up here when an entity is built.
pub struct EntityClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    types: RwLock<HashMap<String, Arc<EntityType>>>,
}

impl fmt::Debug for EntityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClient")
            .field("config", &self.config)
            .field("types", &self.type_names())
            .finish_non_exhaustive()
    }
}

impl EntityClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Arc<Self> {
        Self::with_clock(transport, config, Arc::new(SystemClock))
    }

    /// A client whose caches read time from `clock`.
    pub fn with_clock(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            clock,
            types: RwLock::new(HashMap::new()),
        })
    }

    /// A client over [`HttpTransport`] built from `config`.
    pub fn from_config(config: ClientConfig) -> Result<Arc<Self>> {
        let transport = HttpTransport::new(&config.http)?;
        info!(base_url = %transport.base_url(), "client created");
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Builds and registers a type, replacing any type of the same name.
    ///
    /// The type gets a cache of its own, even when `builder` was derived
    /// from an already registered type.
    pub fn register(self: &Arc<Self>, builder: EntityTypeBuilder) -> Arc<EntityType> {
        let entity_type = builder.build_with(
            Arc::downgrade(self),
            self.clock.clone(),
            self.config.default_cache_max_age_secs,
            self.config.default_batch_size,
        );
        debug!(entity_type = %entity_type.name(), endpoint = %entity_type.endpoint(), "registered");
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.name().to_string(), entity_type.clone());
        entity_type
    }

    /// Looks up a registered type.
    pub fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ImproperlyConfigured(format!("entity type {name} is not registered")))
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub async fn detail(&self, type_name: &str, id: &str, opts: DetailOptions) -> Result<EntityRef> {
        self.entity_type(type_name)?.detail(id, opts).await
    }

    pub async fn list(&self, type_name: &str, opts: ListOptions) -> Result<ListResponse> {
        self.entity_type(type_name)?.list(opts).await
    }
}
