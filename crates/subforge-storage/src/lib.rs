//! Subforge Storage - SQLite persistence layer.
//!
//! Implements [`subforge_core::ConfigStore`] on top of a single SQLite file:
//!
//! - Subscriptions and the nodes decoded from them (nodes cascade on delete)
//! - Node group definitions, seeded with the catch-all group
//! - The rule-set registry, seeded from the built-in list
//! - Settings as a JSON document
//!
//! # Example
//!
//! ```no_run
//! use subforge_storage::Database;
//! use subforge_core::ConfigStore;
//!
//! let db = Database::in_memory().unwrap();
//! let groups = db.list_groups().unwrap();
//! assert_eq!(groups.len(), 1);
//! ```

mod database;
pub mod error;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use pool::ConnectionPool;
pub use schema::SCHEMA_VERSION;
