//! SQLite-backed persistence adapters.

pub mod connection;
pub mod flag_repo;

pub use connection::DatabaseConnection;
pub use flag_repo::SqliteFlagStore;
