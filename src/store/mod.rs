//! Persistence layer: libSQL-backed ledger of categorized transactions.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlLedger;
pub use traits::{Ledger, WriteAck};
