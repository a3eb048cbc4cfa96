/// Connection Management Module
///
/// [`Database`] owns the resolved environment, the resolved connection
/// config, and at most one live connection. Everything is resolved lazily on
/// first use and then kept for the lifetime of the instance. The application
/// builds one `Database` at startup and passes it to whatever needs it.

use super::driver::{driver_for, Driver, Session};
use crate::config::{
    resolve_environment, ConnectionConfig, EnvSource, Environment, Overrides, ProcessEnv,
};
use crate::core::{CrdError, Result};
use crate::error_log::ErrorLog;
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Offset every fresh connection is pinned to (India Standard Time).
pub const SESSION_TIME_ZONE: &str = "+05:30";

/// Shared handle to the single live connection.
///
/// Clones refer to the same underlying session.
#[derive(Clone)]
pub struct DbHandle {
    session: Arc<Mutex<Box<dyn Session>>>,
}

impl DbHandle {
    fn new(session: Box<dyn Session>) -> Self {
        DbHandle {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// True when both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &DbHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }

    /// Runs `f` with exclusive access to the session.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut dyn Session) -> Result<T>) -> Result<T> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| CrdError::Unavailable("Connection lock poisoned".to_string()))?;
        f(&mut **guard)
    }
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle")
            .field("session", &Arc::as_ptr(&self.session))
            .finish()
    }
}

/// Environment-aware access to the dashboard database.
pub struct Database {
    overrides: Overrides,
    env_source: Box<dyn EnvSource>,
    driver: Option<Arc<dyn Driver>>,
    error_log: ErrorLog,
    environment: OnceCell<Environment>,
    config: OnceCell<ConnectionConfig>,
    connection: OnceCell<DbHandle>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("environment", &self.environment.get())
            .field("config", &self.config.get())
            .field("connected", &self.is_connected())
            .field("error_log", &self.error_log)
            .finish()
    }
}

impl Database {
    /// Database reading the process environment, logging under the
    /// configured root (or the working directory).
    pub fn new(overrides: Overrides) -> Self {
        DatabaseBuilder::new().overrides(overrides).build()
    }

    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Resolved environment; computed once per instance.
    pub fn environment(&self) -> Environment {
        *self
            .environment
            .get_or_init(|| resolve_environment(&self.overrides, self.env_source.as_ref()))
    }

    /// Resolved connection settings; computed once per instance.
    pub fn config(&self) -> Result<&ConnectionConfig> {
        self.config.get_or_try_init(|| {
            ConnectionConfig::resolve(
                self.environment(),
                &self.overrides.database,
                self.env_source.as_ref(),
            )
        })
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// Returns the shared connection, opening it on first use.
    ///
    /// A failed open is logged and reported as `CrdError::Unavailable`; the
    /// next call tries again. Once open, the same handle is returned for the
    /// lifetime of this instance.
    pub fn connection(&self) -> Result<DbHandle> {
        self.connection.get_or_try_init(|| self.open()).cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some()
    }

    /// The open connection, without trying to open one.
    pub(crate) fn cached_connection(&self) -> Option<DbHandle> {
        self.connection.get().cloned()
    }

    fn open(&self) -> Result<DbHandle> {
        self.try_open().map_err(|err| {
            let err = match err {
                CrdError::Unavailable(_) => err,
                other => CrdError::Unavailable(other.to_string()),
            };
            self.log_error(&format!("Connection failed: {}", err));
            err
        })
    }

    fn try_open(&self) -> Result<DbHandle> {
        let env = self.environment();
        let config = self.config()?;
        let driver = self
            .driver
            .clone()
            .unwrap_or_else(|| driver_for(config.driver));

        debug!("Opening {} connection: {}", driver.name(), config.dsn());
        let mut session = driver.connect(config, config.tls_policy(env))?;
        session.set_time_zone(SESSION_TIME_ZONE)?;
        info!("Database connected ({}, {})", driver.name(), env);

        Ok(DbHandle::new(session))
    }

    pub(crate) fn log_error(&self, message: &str) {
        self.error_log.record(message);
    }
}

/// Builder for [`Database`], mainly so tests can inject an environment and a
/// driver.
pub struct DatabaseBuilder {
    overrides: Overrides,
    env_source: Option<Box<dyn EnvSource>>,
    driver: Option<Arc<dyn Driver>>,
    error_log: Option<ErrorLog>,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        DatabaseBuilder {
            overrides: Overrides::default(),
            env_source: None,
            driver: None,
            error_log: None,
        }
    }

    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn env_source(mut self, source: impl EnvSource + 'static) -> Self {
        self.env_source = Some(Box::new(source));
        self
    }

    /// Uses `driver` regardless of the configured driver kind.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn error_log(mut self, log: ErrorLog) -> Self {
        self.error_log = Some(log);
        self
    }

    pub fn build(self) -> Database {
        let error_log = self.error_log.unwrap_or_else(|| {
            let root = self
                .overrides
                .logging
                .root
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            ErrorLog::under(root)
        });

        Database {
            overrides: self.overrides,
            env_source: self.env_source.unwrap_or_else(|| Box::new(ProcessEnv)),
            driver: self.driver,
            error_log,
            environment: OnceCell::new(),
            config: OnceCell::new(),
            connection: OnceCell::new(),
        }
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_database, sqlite_database, MockDriver};
    use std::collections::HashMap;

    #[test]
    fn test_connection_is_memoised() {
        let fixture = sqlite_database();
        assert!(!fixture.db.is_connected());

        let first = fixture.db.connection().unwrap();
        let second = fixture.db.connection().unwrap();
        assert!(first.ptr_eq(&second));
        assert!(fixture.db.is_connected());
    }

    #[test]
    fn test_driver_connects_once() {
        let driver = MockDriver::new();
        let fixture = mock_database(driver.clone());

        for _ in 0..3 {
            fixture.db.connection().unwrap();
        }
        assert_eq!(driver.connect_count(), 1);
    }

    #[test]
    fn test_fresh_connection_pins_time_zone_first() {
        let driver = MockDriver::new();
        let fixture = mock_database(driver.clone());

        fixture.db.connection().unwrap();
        assert_eq!(driver.events(), vec!["TIME ZONE +05:30".to_string()]);
    }

    #[test]
    fn test_failed_open_is_logged_and_retried() {
        let driver = MockDriver::failing_connect();
        let fixture = mock_database(driver.clone());

        let err = fixture.db.connection().unwrap_err();
        assert!(err.is_unavailable());
        assert!(!fixture.db.is_connected());

        assert!(fixture.db.connection().is_err());
        assert_eq!(driver.connect_count(), 2);

        let log = std::fs::read_to_string(fixture.db.error_log().path()).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("Connection failed"));
    }

    #[test]
    fn test_time_zone_failure_means_no_connection() {
        let driver = MockDriver::failing_time_zone();
        let fixture = mock_database(driver);

        assert!(fixture.db.connection().unwrap_err().is_unavailable());
        assert!(!fixture.db.is_connected());
    }

    #[test]
    fn test_invalid_config_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let env: HashMap<String, String> =
            [("DB_PORT".to_string(), "99999".to_string())].into_iter().collect();
        let db = Database::builder()
            .env_source(env)
            .driver(Arc::new(MockDriver::new()))
            .error_log(ErrorLog::under(dir.path()))
            .build();

        let err = db.connection().unwrap_err();
        assert!(matches!(&err, CrdError::Unavailable(msg) if msg.contains("port")));
    }

    #[test]
    fn test_environment_is_cached_per_instance() {
        let driver = MockDriver::new();
        let fixture = mock_database(driver);
        let env = fixture.db.environment();
        assert_eq!(env, Environment::Development);
        assert_eq!(fixture.db.environment(), env);
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = sqlite_database();
        let b = sqlite_database();
        let ha = a.db.connection().unwrap();
        let hb = b.db.connection().unwrap();
        assert!(!ha.ptr_eq(&hb));
    }
}
