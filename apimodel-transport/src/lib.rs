//! HTTP transport layer for apimodel.
//!
//! The entity layer never talks to the network directly. It goes through
//! the [`Transport`] trait, which performs one HTTP verb against a path and
//! returns a [`Response`] (`status`, `headers`, `data`) or a
//! [`TransportError`] exposing `status` and `body`.
//!
//! ## Implementations
//!
//! - [`HttpTransport`]: reqwest-backed client bound to a base URL
//! - [`mock::MockTransport`]: in-memory routes with a call log, for tests
//!
//! The [`query`] module holds the path helpers the entity layer uses to
//! build detail and list URLs.

mod error;
mod http;
pub mod mock;
pub mod query;
mod transport;

pub use error::{TransportError, TransportResult};
pub use http::{HttpConfig, HttpTransport};
pub use transport::{Headers, Method, Request, Response, Transport};
