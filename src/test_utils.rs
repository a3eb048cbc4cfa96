/// # Test Utilities Module
///
/// Fixtures shared by the unit tests:
/// - `DatabaseFixture`: a `Database` on an in-memory SQLite connection with
///   its error log in a temporary directory
/// - `MockDriver`: a scripted driver that records what reaches the session

use crate::config::{ConnectionConfig, DatabaseOverrides, DriverKind, Overrides, TlsPolicy};
use crate::core::db::driver::{Driver, Session};
use crate::core::db::{Database, QueryOutcome, StatementKind};
use crate::core::{CrdError, Result};
use crate::error_log::ErrorLog;
use crate::sql::{BoundStatement, Params};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Isolated database test fixture
pub struct DatabaseFixture {
    pub db: Database,
    // keeps the log directory alive for the fixture's lifetime
    _log_dir: TempDir,
}

impl DatabaseFixture {
    /// Create the standard `users` table
    pub fn create_users(&self) {
        self.db
            .execute_query(
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL UNIQUE,
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
                )",
                &Params::new(),
            )
            .expect("create users table");
    }
}

fn fixture(builder: impl FnOnce(crate::core::db::DatabaseBuilder) -> crate::core::db::DatabaseBuilder) -> DatabaseFixture {
    let log_dir = tempfile::tempdir().expect("create log dir");
    let db = builder(
        Database::builder()
            .env_source(HashMap::<String, String>::new())
            .error_log(ErrorLog::under(log_dir.path())),
    )
    .build();

    DatabaseFixture { db, _log_dir: log_dir }
}

/// Development database on a private in-memory SQLite connection.
pub fn sqlite_database() -> DatabaseFixture {
    fixture(|builder| {
        builder.overrides(Overrides {
            database: DatabaseOverrides {
                driver: Some(DriverKind::Sqlite),
                database: Some(":memory:".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    })
}

/// Development database backed by `driver`.
pub fn mock_database(driver: MockDriver) -> DatabaseFixture {
    fixture(|builder| builder.driver(Arc::new(driver)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Failure {
    #[default]
    None,
    Connect,
    TimeZone,
    Metadata,
}

/// Driver whose sessions record every call as a readable event line.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    events: Arc<Mutex<Vec<String>>>,
    connects: Arc<AtomicUsize>,
    failure: Failure,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver::default()
    }

    pub fn failing_connect() -> Self {
        MockDriver { failure: Failure::Connect, ..Default::default() }
    }

    pub fn failing_time_zone() -> Self {
        MockDriver { failure: Failure::TimeZone, ..Default::default() }
    }

    pub fn failing_metadata() -> Self {
        MockDriver { failure: Failure::Metadata, ..Default::default() }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn connect(&self, _config: &ConnectionConfig, _tls: TlsPolicy) -> Result<Box<dyn Session>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::Connect {
            return Err(CrdError::Unavailable("connection refused".to_string()));
        }
        Ok(Box::new(MockSession {
            events: Arc::clone(&self.events),
            failure: self.failure,
        }))
    }
}

struct MockSession {
    events: Arc<Mutex<Vec<String>>>,
    failure: Failure,
}

impl MockSession {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Session for MockSession {
    fn execute(&mut self, statement: &BoundStatement, kind: StatementKind) -> Result<QueryOutcome> {
        let values: Vec<String> = statement.values.iter().map(ToString::to_string).collect();
        self.record(format!("EXECUTE {} [{}]", statement.sql, values.join(", ")));
        Ok(match kind {
            StatementKind::Select => QueryOutcome::Rows(vec![]),
            StatementKind::Command => QueryOutcome::Done,
        })
    }

    fn begin(&mut self) -> Result<()> {
        self.record("BEGIN".to_string());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.record("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.record("ROLLBACK".to_string());
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }

    fn set_time_zone(&mut self, offset: &str) -> Result<()> {
        if self.failure == Failure::TimeZone {
            return Err(CrdError::statement("SET time_zone", "unknown time zone"));
        }
        self.record(format!("TIME ZONE {}", offset));
        Ok(())
    }

    fn server_info(&mut self) -> Result<String> {
        if self.failure == Failure::Metadata {
            return Err(CrdError::statement("SELECT VERSION()", "server has gone away"));
        }
        Ok("mock 1.0".to_string())
    }

    fn client_info(&self) -> String {
        "mock-client".to_string()
    }

    fn identifier_quote(&self) -> char {
        '`'
    }
}
