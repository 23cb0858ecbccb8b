//! Shared type definitions for apimodel.
//!
//! This crate defines the small, transport-agnostic types used by the
//! entity layer:
//! - [`Clock`]: an injectable source of "now" in epoch milliseconds
//! - [`EntityTypeId`] and [`EntityKey`]: typed identity of an entity type
//!   and of one entity within it

mod clock;
mod key;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{EntityKey, EntityTypeId};
