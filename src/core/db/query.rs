/// Query Execution Module
///
/// Value and row types shared by every driver, and the query operations on
/// [`Database`]: parameterised execution, insert ids, and existence checks.

use super::Database;
use crate::core::{CrdError, Result};
use crate::sql::{bind_named, quote_identifier, Params};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{debug, warn};

/// A single column value, as bound into or read out of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value, converting booleans, unsigned values that
    /// fit, and numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(t) => t.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(t) => f.write_str(t),
            Value::Bytes(b) => write!(f, "<BLOB: {} bytes>", b.len()),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(t) => serializer.serialize_str(t),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row, keyed by column name in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Row { columns }
    }

    /// Value of the named column. With duplicate names the first one wins.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Result of a successful statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// Rows of a `SELECT`, in driver order; may be empty
    Rows(Vec<Row>),
    /// Any other statement completed
    Done,
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Done => None,
        }
    }

    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Done => None,
        }
    }
}

/// What a driver should do with a bound statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Collect result rows
    Select,
    /// Run to completion and discard any rows
    Command,
}

impl StatementKind {
    pub fn from_sql(sql: &str) -> Self {
        if crate::sql::is_select(sql) {
            StatementKind::Select
        } else {
            StatementKind::Command
        }
    }
}

impl Database {
    /// Executes `sql` with named parameters on the shared connection.
    ///
    /// Statements whose first token is `SELECT` return
    /// [`QueryOutcome::Rows`] (possibly empty); every other statement returns
    /// [`QueryOutcome::Done`]. No statement is prepared when the connection
    /// is unavailable.
    ///
    /// # Errors
    ///
    /// * `CrdError::Unavailable` when no connection can be opened
    /// * `CrdError::Parameter` when `params` do not match the placeholders
    /// * `CrdError::Statement` when the driver rejects or fails the statement
    ///
    /// Statement and parameter failures are written to the error log along
    /// with the query text.
    pub fn execute_query(&self, sql: &str, params: &Params) -> Result<QueryOutcome> {
        let handle = self.connection()?;
        let kind = StatementKind::from_sql(sql);
        debug!("Executing {:?} statement: {}", kind, sql);

        bind_named(sql, params)
            .and_then(|bound| handle.with_session(|session| session.execute(&bound, kind)))
            .map_err(|err| {
                let err = match err {
                    CrdError::Parameter(_) | CrdError::Statement { .. } => err,
                    other => CrdError::statement(sql, other),
                };
                match &err {
                    // Statement errors already name their query
                    CrdError::Statement { .. } => self.log_error(&format!("Query failed: {}", err)),
                    _ => self.log_error(&format!("Query failed: {} [query: {}]", err, sql)),
                }
                err
            })
    }

    /// Id generated by the most recent insert on the shared connection.
    pub fn last_insert_id(&self) -> Result<Option<u64>> {
        let handle = self.connection()?;
        handle.with_session(|session| session.last_insert_id())
    }

    /// True when at least one row of `table` has `column = value`.
    ///
    /// `table` and `column` must be plain identifiers (optionally
    /// `schema.table`); anything else is a `CrdError::Parameter`.
    pub fn try_record_exists(&self, table: &str, column: &str, value: impl Into<Value>) -> Result<bool> {
        let handle = self.connection()?;
        let quote = handle.with_session(|session| Ok(session.identifier_quote()))?;
        let sql = format!(
            "SELECT COUNT(*) AS row_count FROM {} WHERE {} = :value",
            quote_identifier(table, quote)?,
            quote_identifier(column, quote)?
        );

        let outcome = self.execute_query(&sql, &Params::new().bind("value", value))?;
        let count = outcome
            .rows()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("row_count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count > 0)
    }

    /// Like [`try_record_exists`](Self::try_record_exists), but any failure
    /// reads as `false`.
    ///
    /// A missing row, an unreachable database, and a failed query all give
    /// the same answer here. Callers that need to tell them apart use
    /// `try_record_exists`.
    pub fn record_exists(&self, table: &str, column: &str, value: impl Into<Value>) -> bool {
        self.try_record_exists(table, column, value)
            .unwrap_or_else(|err| {
                warn!("Existence check on {}.{} failed: {}", table, column, err);
                false
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_database, sqlite_database, MockDriver};

    #[test]
    fn test_row_lookup_preserves_order() {
        let row = Row::new(vec![
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("Alice".to_string())),
            ("note".to_string(), Value::Null),
        ]);

        assert_eq!(row.len(), 3);
        assert_eq!(row.get("name"), Some(&Value::Text("Alice".to_string())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["id", "name", "note"]);
    }

    #[test]
    fn test_row_serializes_as_ordered_map() {
        let row = Row::new(vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Null),
        ]);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":2,"a":null}"#);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<BLOB: 3 bytes>");
    }

    #[test]
    fn test_statement_kind_classification() {
        assert_eq!(StatementKind::from_sql(" select 1"), StatementKind::Select);
        assert_eq!(StatementKind::from_sql("INSERT INTO t VALUES (1)"), StatementKind::Command);
        assert_eq!(StatementKind::from_sql("SHOW TABLES"), StatementKind::Command);
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = QueryOutcome::Rows(vec![]);
        assert_eq!(outcome.rows().map(<[Row]>::len), Some(0));
        assert!(QueryOutcome::Done.rows().is_none());
    }

    #[test]
    fn test_select_returns_rows_and_commands_return_done() {
        let fixture = sqlite_database();
        fixture.create_users();

        let insert = fixture
            .db
            .execute_query(
                "INSERT INTO users (username, email) VALUES (:username, :email)",
                &Params::new().bind("username", "alice").bind(":email", "alice@example.com"),
            )
            .unwrap();
        assert_eq!(insert, QueryOutcome::Done);
        assert_eq!(fixture.db.last_insert_id().unwrap(), Some(1));

        let rows = fixture
            .db
            .execute_query("  select id, username FROM users WHERE username = :u", &Params::new().bind("u", "alice"))
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("username"), Some(&Value::Text("alice".into())));
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_select_with_no_matches_is_empty_not_error() {
        let fixture = sqlite_database();
        fixture.create_users();

        let outcome = fixture
            .db
            .execute_query("SELECT * FROM users WHERE username = :u", &Params::new().bind("u", "nobody"))
            .unwrap();
        assert_eq!(outcome, QueryOutcome::Rows(vec![]));
    }

    #[test]
    fn test_statement_failure_is_logged_with_query() {
        let fixture = sqlite_database();

        let err = fixture
            .db
            .execute_query("SELECT * FROM nonexistent_table", &Params::new())
            .unwrap_err();
        match &err {
            CrdError::Statement { query, message } => {
                assert_eq!(query, "SELECT * FROM nonexistent_table");
                assert!(message.contains("no such table"));
            }
            other => panic!("Expected Statement error, got {other}"),
        }

        let log = std::fs::read_to_string(fixture.db.error_log().path()).unwrap();
        assert!(log.contains("Query failed"));
        assert!(log.contains("SELECT * FROM nonexistent_table"));
    }

    #[test]
    fn test_unavailable_connection_prepares_nothing() {
        let driver = MockDriver::failing_connect();
        let fixture = mock_database(driver.clone());

        let err = fixture
            .db
            .execute_query("DELETE FROM users", &Params::new())
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(driver.events().is_empty());
    }

    #[test]
    fn test_record_exists() {
        let fixture = sqlite_database();
        fixture.create_users();
        fixture
            .db
            .execute_query(
                "INSERT INTO users (username, email) VALUES (:username, :email)",
                &Params::new().bind("username", "alice").bind("email", "alice@example.com"),
            )
            .unwrap();

        assert!(fixture.db.record_exists("users", "username", "alice"));
        assert!(!fixture.db.record_exists("users", "username", "bob"));
        assert_eq!(fixture.db.try_record_exists("users", "username", "bob").unwrap(), false);
    }

    #[test]
    fn test_record_exists_conflates_failure_with_absence() {
        let fixture = sqlite_database();
        fixture.create_users();

        // missing table: the checked variant reports the error...
        assert!(fixture.db.try_record_exists("no_such_table", "username", "alice").is_err());
        // ...while the boolean variant reads it as "not found"
        assert!(!fixture.db.record_exists("no_such_table", "username", "alice"));
        assert!(!fixture.db.record_exists("users; DROP TABLE users", "username", "alice"));

        let unavailable = mock_database(MockDriver::failing_connect());
        assert!(!unavailable.db.record_exists("users", "username", "alice"));
    }

    #[test]
    fn test_record_exists_sql_uses_bound_value() {
        let driver = MockDriver::new();
        let fixture = mock_database(driver.clone());

        fixture.db.record_exists("users", "username", "o'brien");
        let events = driver.events();
        assert_eq!(
            events.last().unwrap(),
            "EXECUTE SELECT COUNT(*) AS row_count FROM `users` WHERE `username` = ? [o'brien]"
        );
    }
}
