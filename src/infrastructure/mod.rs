//! Infrastructure layer: configuration, logging, persistence adapters,
//! and stack wiring.

pub mod config;
pub mod database;
pub mod logging;
pub mod setup;

pub use config::{ConfigError, ConfigLoader};
pub use database::{DatabaseConnection, SqliteFlagStore};
pub use setup::{Sightline, SightlineBuilder};
