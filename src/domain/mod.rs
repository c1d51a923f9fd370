//! Domain layer: models, errors, and port traits.
//!
//! Nothing in here depends on infrastructure; services and adapters depend
//! on these types, never the other way around.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
