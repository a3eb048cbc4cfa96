/// SQLite Driver
///
/// Embedded engine used for local development and tests. `database` in the
/// connection config is the file path, or `:memory:`.

use super::{Driver, Session};
use crate::config::{ConnectionConfig, TlsPolicy};
use crate::core::db::{QueryOutcome, Row, StatementKind, Value};
use crate::core::{CrdError, Result};
use crate::sql::BoundStatement;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, Statement, ToSql};
use tracing::debug;

/// Capacity of the prepared statement cache on persistent connections.
const STATEMENT_CACHE_CAPACITY: usize = 64;

/// Name of the SQL function that reports the pinned session offset.
pub const TIME_ZONE_FUNCTION: &str = "session_time_zone";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self, config: &ConnectionConfig, _tls: TlsPolicy) -> Result<Box<dyn Session>> {
        let conn = Connection::open(&config.database)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if config.persistent {
            conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        }
        debug!("Opened SQLite database at {}", config.database);

        Ok(Box::new(SqliteSession {
            conn,
            cache_statements: config.persistent,
        }))
    }
}

#[derive(Debug)]
pub struct SqliteSession {
    conn: Connection,
    cache_statements: bool,
}

impl Session for SqliteSession {
    fn execute(&mut self, statement: &BoundStatement, kind: StatementKind) -> Result<QueryOutcome> {
        if self.cache_statements {
            let mut cached = self.conn.prepare_cached(&statement.sql)?;
            run_statement(&mut cached, statement, kind)
        } else {
            let mut prepared = self.conn.prepare(&statement.sql)?;
            run_statement(&mut prepared, statement, kind)
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.transaction_command("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.transaction_command("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.transaction_command("ROLLBACK")
    }

    fn last_insert_id(&mut self) -> Result<Option<u64>> {
        Ok(u64::try_from(self.conn.last_insert_rowid())
            .ok()
            .filter(|id| *id > 0))
    }

    // SQLite has no session time zone; the offset is published through a SQL
    // function so callers can read it back like a session variable.
    fn set_time_zone(&mut self, offset: &str) -> Result<()> {
        let offset = offset.to_string();
        self.conn.create_scalar_function(
            TIME_ZONE_FUNCTION,
            0,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |_ctx| Ok(offset.clone()),
        )?;
        Ok(())
    }

    fn server_info(&mut self) -> Result<String> {
        let version: String = self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        Ok(format!("SQLite {}", version))
    }

    fn client_info(&self) -> String {
        format!("rusqlite (libsqlite3 {})", rusqlite::version())
    }

    fn identifier_quote(&self) -> char {
        '"'
    }
}

impl SqliteSession {
    fn transaction_command(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| CrdError::Transaction(format!("{} failed: {}", sql, e)))
    }
}

fn run_statement(
    prepared: &mut Statement<'_>,
    statement: &BoundStatement,
    kind: StatementKind,
) -> Result<QueryOutcome> {
    let expected = prepared.parameter_count();
    if expected != statement.values.len() {
        return Err(CrdError::Parameter(format!(
            "Statement expects {} parameters, {} bound",
            expected,
            statement.values.len()
        )));
    }
    for (idx, value) in statement.values.iter().enumerate() {
        prepared.raw_bind_parameter(idx + 1, value)?;
    }

    let columns: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
    let mut rows = prepared.raw_query();

    match kind {
        StatementKind::Select => {
            let mut collected = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for (idx, name) in columns.iter().enumerate() {
                    values.push((name.clone(), from_sqlite(row.get_ref(idx)?)));
                }
                collected.push(Row::new(values));
            }
            Ok(QueryOutcome::Rows(collected))
        }
        StatementKind::Command => {
            // step to completion; statements that happen to return rows still succeed
            while rows.next()?.is_some() {}
            Ok(QueryOutcome::Done)
        }
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::UInt(u) => {
                let signed = i64::try_from(*u)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(SqlValue::Integer(signed))
            }
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
        })
    }
}
