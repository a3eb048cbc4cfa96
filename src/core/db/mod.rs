/// Database Module
///
/// The dashboard's database access layer, split into focused submodules:
///
/// - **Connection Management** (`connection.rs`): environment and config
///   resolution, lazy open, the shared connection handle
/// - **Query Execution** (`query.rs`): value/row types, parameterised
///   statements, insert ids, existence checks
/// - **Transactions** (`transaction.rs`): begin, commit, rollback
/// - **Diagnostics** (`diagnostics.rs`): status reporting
/// - **Drivers** (`driver/`): MySQL (sqlx) and SQLite (rusqlite) sessions
///
/// ## Error Handling
///
/// Operations return `Result<_, CrdError>`. Failures are written to the
/// error log where they happen and then returned to the caller.
pub mod connection;
pub mod diagnostics;
pub mod driver;
pub mod query;
pub mod transaction;

pub use connection::*;
pub use diagnostics::Status;
pub use query::*;
