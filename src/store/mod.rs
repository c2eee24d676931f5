//! Persistence layer: libSQL-backed storage for jobs, transfers, escalations,
//! and blocked numbers.

pub mod libsql_backend;
pub mod migrations;
pub mod sink;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use sink::PersistenceSink;
pub use traits::Database;
