//! Database access layer for the Central Resource Dashboard.
//!
//! Build one [`Database`] at startup and share it:
//!
//! ```no_run
//! use crdash::{Database, Overrides, Params};
//!
//! let db = Database::new(Overrides::default());
//! let rows = db.execute_query(
//!     "SELECT id, username FROM users WHERE username = :username",
//!     &Params::new().bind("username", "alice"),
//! )?;
//! # Ok::<(), crdash::CrdError>(())
//! ```

// Core infrastructure modules
pub mod core;

// Supporting modules
pub mod config;
pub mod error_log;
pub mod escape;
pub mod sql;

#[cfg(test)]
mod test_utils;

pub use crate::config::{ConnectionConfig, DriverKind, Environment, Overrides};
pub use crate::core::db::{Database, DbHandle, QueryOutcome, Row, Status, Value};
pub use crate::core::{CrdError, Result};
pub use crate::escape::escape_string;
pub use crate::sql::Params;
