//! Typed entities over a REST API.
//!
//! Provides a client-side modeling layer for JSON resources:
//! - per-type entity caches with a configurable max age
//! - at most one detail request per identity at a time
//! - relations resolved in batches, with the remainder loaded on demand
//! - attribute access by dotted path through resolved relations
//! - paginated list responses
//!
//! # Architecture
//!
//! ## Components
//!
//! - **EntityClient**: Owns the transport and the registry of entity types
//! - **EntityType**: Endpoint, identity attribute, cache, defaults,
//!   validators and relations of one kind of record
//! - **Entity**: One record, with wire attributes, changes and relation managers
//! - **RelationManager**: Loads the entities behind one relation attribute
//! - **EntityCache**: Identity to entity map with lazy expiry
//! - **InFlightRegistry**: Waiters on outstanding detail fetches
//!
//! ## Detail fetch
//!
//! 1. **Cache**: An unexpired cached instance is returned as is
//! 2. **Join**: A caller arriving while a fetch for the same identity is
//!    outstanding waits for it
//! 3. **Fetch**: Otherwise the caller fetches, caches and releases the waiters
//! 4. **Relations**: Each caller resolves relations per its own options
//!
//! # Example
//!
//! ```no_run
//! use apimodel::{ClientConfig, DetailOptions, EntityClient, EntityTypeBuilder, RelationSpec};
//!
//! # async fn run() -> apimodel::Result<()> {
//! let client = EntityClient::from_config(ClientConfig::with_base_url("https://api.example.com"))?;
//! client.register(EntityTypeBuilder::new("User", "/users"));
//! let posts = client.register(
//!     EntityTypeBuilder::new("Post", "/posts").relation("author", RelationSpec::to("User")),
//! );
//!
//! let post = posts.detail("1", DetailOptions::new().resolve_related()).await?;
//! let author_name = post.get("author.name")?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod config;
mod entity;
mod entity_type;
mod error;
mod list;
mod options;
mod relation;
mod single_flight;

pub use cache::{CacheEntry, CacheMaxAge, EntityCache};
pub use client::EntityClient;
pub use config::ClientConfig;
pub use entity::{AttrInput, Attribute, Entity, EntityRef};
pub use entity_type::{DefaultValue, EntityType, EntityTypeBuilder, Validator};
pub use error::{Error, Result, ValidationError};
pub use list::{ListResponse, PAGINATION_COUNT, PAGINATION_LIMIT, PAGINATION_PAGE};
pub use options::{DetailOptions, ListOptions, ResolveOptions, SaveOptions};
pub use relation::{RelationManager, RelationSpec, RelationValue};
pub use single_flight::{Flight, FlightFailure, FlightGuard, FlightResult, InFlightRegistry};

pub use apimodel_transport::{
    mock, HttpConfig, HttpTransport, Method, Request, Response, Transport, TransportError,
};
pub use apimodel_types::{Clock, EntityKey, EntityTypeId, ManualClock, SystemClock};
