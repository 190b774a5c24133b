//! Persistence layer — libSQL-backed storage for senders, rules, and
//! the notification log.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, ObservedMessage};
