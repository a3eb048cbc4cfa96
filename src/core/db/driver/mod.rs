//! Database drivers.
//!
//! A [`Driver`] opens a [`Session`]; the session is the single live
//! connection that [`Database`](crate::core::db::Database) memoises. The
//! MySQL driver is the production engine; the SQLite driver backs local
//! development and the test suite.

pub mod mysql;
pub mod sqlite;

use crate::config::{ConnectionConfig, DriverKind, TlsPolicy};
use crate::core::db::{QueryOutcome, StatementKind};
use crate::core::Result;
use crate::sql::BoundStatement;
use std::sync::Arc;

pub use mysql::MySqlDriver;
pub use sqlite::SqliteDriver;

/// Opens connections for one database engine.
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a new session. The caller owns the returned session for the
    /// rest of its lifetime.
    fn connect(&self, config: &ConnectionConfig, tls: TlsPolicy) -> Result<Box<dyn Session>>;
}

/// An open connection.
pub trait Session: Send {
    /// Runs a statement whose placeholders are already positional.
    fn execute(&mut self, statement: &BoundStatement, kind: StatementKind) -> Result<QueryOutcome>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Id generated by the most recent insert on this session, if any.
    fn last_insert_id(&mut self) -> Result<Option<u64>>;

    /// Pins the session time zone to a UTC offset such as `+05:30`.
    fn set_time_zone(&mut self, offset: &str) -> Result<()>;

    /// Server version, read from the server.
    fn server_info(&mut self) -> Result<String>;

    /// Client library description.
    fn client_info(&self) -> String;

    /// Character used to quote identifiers in generated SQL.
    fn identifier_quote(&self) -> char;
}

/// Built-in driver for `kind`.
pub fn driver_for(kind: DriverKind) -> Arc<dyn Driver> {
    match kind {
        DriverKind::MySql => Arc::new(MySqlDriver),
        DriverKind::Sqlite => Arc::new(SqliteDriver),
    }
}
