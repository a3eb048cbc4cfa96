//! Configuration for the database layer.
//!
//! Every connection setting is resolved through the same chain: an explicit
//! override (from the TOML config file or built in code), then an
//! environment-specific variable such as `DB_HOST_PROD`, then the plain
//! variable such as `DB_HOST`, then the static default for the active
//! [`Environment`].

use crate::core::{CrdError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Primary variable naming the deployment environment.
pub const ENVIRONMENT_VAR: &str = "APP_ENV";
/// Older deployments set this instead of `APP_ENV`.
pub const LEGACY_ENVIRONMENT_VAR: &str = "ENVIRONMENT";

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Parses the common spellings of an environment name, ignoring case.
    ///
    /// Returns `None` for anything unrecognised so the caller can decide on a
    /// fallback.
    pub fn parse_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "local" => Some(Environment::Development),
            _ => None,
        }
    }

    /// Suffix used by the environment-specific variables (`DB_HOST_PROD`).
    fn var_suffix(&self) -> &'static str {
        match self {
            Environment::Development => "DEV",
            Environment::Production => "PROD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of environment variables.
///
/// Empty values are treated as unset.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads variables from the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Resolves the environment: explicit override, then `APP_ENV`, then
/// `ENVIRONMENT`, then development. Never fails.
pub fn resolve_environment(overrides: &Overrides, env: &dyn EnvSource) -> Environment {
    if let Some(explicit) = overrides.environment {
        return explicit;
    }

    for key in [ENVIRONMENT_VAR, LEGACY_ENVIRONMENT_VAR] {
        if let Some(raw) = env.var(key) {
            return match Environment::parse_name(&raw) {
                Some(parsed) => parsed,
                None => {
                    warn!("Unrecognised {} value {:?}, using development", key, raw);
                    Environment::Development
                }
            };
        }
    }

    Environment::default()
}

/// Database engine behind the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    MySql,
    Sqlite,
}

impl FromStr for DriverKind {
    type Err = CrdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DriverKind::MySql),
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            other => Err(CrdError::Config(format!("Unknown database driver '{}'", other))),
        }
    }
}

/// Whether the server certificate is checked when TLS is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    Verify,
    SkipVerification,
}

/// Fully resolved connection settings.
#[derive(Clone, PartialEq)]
pub struct ConnectionConfig {
    pub driver: DriverKind,
    pub host: String,
    /// Database name, or the file path for SQLite
    pub database: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub charset: String,
    /// Only honoured in development
    pub skip_tls_verify: bool,
    /// Keep prepared statements cached on the shared connection
    pub persistent: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("charset", &self.charset)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("persistent", &self.persistent)
            .finish()
    }
}

impl ConnectionConfig {
    pub const DEFAULT_PORT: u16 = 3306;
    pub const DEFAULT_CHARSET: &'static str = "utf8mb4";

    /// Static defaults for each environment.
    pub fn defaults_for(env: Environment) -> Self {
        match env {
            Environment::Development => ConnectionConfig {
                driver: DriverKind::MySql,
                host: "localhost".to_string(),
                database: "central_dashboard".to_string(),
                username: "root".to_string(),
                password: String::new(),
                port: Self::DEFAULT_PORT,
                charset: Self::DEFAULT_CHARSET.to_string(),
                skip_tls_verify: true,
                persistent: false,
            },
            Environment::Production => ConnectionConfig {
                driver: DriverKind::MySql,
                host: "localhost".to_string(),
                database: "central_dashboard".to_string(),
                username: "crd_app".to_string(),
                password: String::new(),
                port: Self::DEFAULT_PORT,
                charset: Self::DEFAULT_CHARSET.to_string(),
                skip_tls_verify: false,
                persistent: true,
            },
        }
    }

    /// Applies the override chain to every field.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::Config` when a port, flag, or driver value cannot be
    /// parsed.
    pub fn resolve(
        env: Environment,
        overrides: &DatabaseOverrides,
        source: &dyn EnvSource,
    ) -> Result<Self> {
        let defaults = Self::defaults_for(env);
        let chain = FieldChain { env, source };

        let driver = match overrides.driver {
            Some(kind) => kind,
            None => match chain.lookup(None, "DB_DRIVER") {
                Some(raw) => raw.parse()?,
                None => defaults.driver,
            },
        };

        let port = match overrides.port {
            Some(port) => port,
            None => match chain.lookup(Some("DB_PORT"), "DB_PORT") {
                Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                    CrdError::Config(format!("Invalid database port '{}': {}", raw, e))
                })?,
                None => defaults.port,
            },
        };

        let skip_tls_verify = match overrides.skip_tls_verify {
            Some(flag) => flag,
            None => match chain.lookup(None, "DB_SKIP_SSL") {
                Some(raw) => parse_flag("DB_SKIP_SSL", &raw)?,
                None => defaults.skip_tls_verify,
            },
        };

        let persistent = match overrides.persistent {
            Some(flag) => flag,
            None => match chain.lookup(None, "DB_PERSISTENT") {
                Some(raw) => parse_flag("DB_PERSISTENT", &raw)?,
                None => defaults.persistent,
            },
        };

        Ok(ConnectionConfig {
            driver,
            host: chain.text(&overrides.host, Some("DB_HOST"), "DB_HOST", defaults.host),
            database: chain.text(&overrides.database, Some("DB_NAME"), "DB_NAME", defaults.database),
            username: chain.text(&overrides.username, Some("DB_USERNAME"), "DB_USER", defaults.username),
            password: chain.text(&overrides.password, Some("DB_PASSWORD"), "DB_PASS", defaults.password),
            port,
            charset: chain.text(&overrides.charset, None, "DB_CHARSET", defaults.charset),
            skip_tls_verify,
            persistent,
        })
    }

    /// Connection descriptor, e.g. `mysql:host=db;dbname=crd;port=3306;charset=utf8mb4`.
    pub fn dsn(&self) -> String {
        match self.driver {
            DriverKind::MySql => format!(
                "mysql:host={};dbname={};port={};charset={}",
                self.host, self.database, self.port, self.charset
            ),
            DriverKind::Sqlite => format!("sqlite:{}", self.database),
        }
    }

    /// Certificate checks are skipped only for development with the flag set.
    pub fn tls_policy(&self, env: Environment) -> TlsPolicy {
        if self.skip_tls_verify && env == Environment::Development {
            TlsPolicy::SkipVerification
        } else {
            TlsPolicy::Verify
        }
    }
}

struct FieldChain<'a> {
    env: Environment,
    source: &'a dyn EnvSource,
}

impl FieldChain<'_> {
    fn lookup(&self, suffixed: Option<&str>, plain: &str) -> Option<String> {
        suffixed
            .and_then(|base| self.source.var(&format!("{}_{}", base, self.env.var_suffix())))
            .or_else(|| self.source.var(plain))
    }

    fn text(&self, explicit: &Option<String>, suffixed: Option<&str>, plain: &str, default: String) -> String {
        explicit
            .clone()
            .or_else(|| self.lookup(suffixed, plain))
            .unwrap_or(default)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CrdError::Config(format!("Invalid boolean for {}: '{}'", key, raw))),
    }
}

/// Explicit overrides, typically loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Overrides {
    pub environment: Option<Environment>,
    #[serde(default)]
    pub database: DatabaseOverrides,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-field connection overrides. Unset fields fall through the chain.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DatabaseOverrides {
    pub driver: Option<DriverKind>,
    pub host: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub charset: Option<String>,
    pub skip_tls_verify: Option<bool>,
    pub persistent: Option<bool>,
}

/// Error log placement.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Application root; the error log goes to `<root>/logs/db_errors.log`
    pub root: Option<PathBuf>,
}

/// Loads overrides from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let overrides = crdash::config::load_config("crdash.toml").expect("Failed to load config");
/// println!("{:?}", overrides);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Overrides> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}
