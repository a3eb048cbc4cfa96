//! Transaction control on the shared connection.
//!
//! There is no nesting and no savepoint support. What happens on a commit
//! without a begin is up to the engine: SQLite reports an error, MySQL
//! treats it as a no-op.

use super::driver::Session;
use super::Database;
use crate::core::{CrdError, Result};

impl Database {
    pub fn begin_transaction(&self) -> Result<()> {
        self.transaction_step("BEGIN", |session| session.begin())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.transaction_step("COMMIT", |session| session.commit())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.transaction_step("ROLLBACK", |session| session.rollback())
    }

    fn transaction_step(
        &self,
        action: &str,
        step: impl FnOnce(&mut dyn Session) -> Result<()>,
    ) -> Result<()> {
        let handle = self.connection()?;
        handle.with_session(step).map_err(|err| {
            let err = match err {
                CrdError::Transaction(_) => err,
                other => CrdError::Transaction(format!("{} failed: {}", action, other)),
            };
            self.log_error(&err.to_string());
            err
        })
    }
}
