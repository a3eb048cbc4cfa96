//! MySQL/MariaDB driver built on sqlx.
//!
//! sqlx is async; each session owns a current-thread tokio runtime and
//! blocks on it, so the rest of the crate stays synchronous. Do not call
//! into a MySQL session from inside another tokio runtime; use
//! `spawn_blocking` there.

use super::{Driver, Session};
use crate::config::{ConnectionConfig, TlsPolicy};
use crate::core::db::{QueryOutcome, Row, StatementKind, Value};
use crate::core::Result;
use crate::sql::BoundStatement;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike as _};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column as _, Connection as _, Executor as _, Row as _, TypeInfo as _, ValueRef as _};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Prepared statements kept per connection when `persistent` is set.
const STATEMENT_CACHE_CAPACITY: usize = 100;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl Driver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn connect(&self, config: &ConnectionConfig, tls: TlsPolicy) -> Result<Box<dyn Session>> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let options = connect_options(config, tls);
        let conn = runtime.block_on(MySqlConnection::connect_with(&options))?;
        debug!(
            "Connected to MySQL at {}:{} ({:?})",
            config.host,
            config.port,
            ssl_mode_for(tls)
        );

        Ok(Box::new(MySqlSession { conn, runtime }))
    }
}

/// Translates the resolved config into sqlx connect options.
pub fn connect_options(config: &ConnectionConfig, tls: TlsPolicy) -> MySqlConnectOptions {
    let cache = if config.persistent { STATEMENT_CACHE_CAPACITY } else { 0 };
    MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(&config.password)
        .database(&config.database)
        .charset(&config.charset)
        .ssl_mode(ssl_mode_for(tls))
        .statement_cache_capacity(cache)
}

/// `VerifyIdentity` requires TLS: a server that does not offer it is
/// refused rather than used in plain text, and its certificate must chain
/// to a trusted root and match the host name. `Preferred` still encrypts
/// when the server offers TLS, but never checks the certificate and falls
/// back to plain text otherwise.
pub fn ssl_mode_for(tls: TlsPolicy) -> MySqlSslMode {
    match tls {
        TlsPolicy::Verify => MySqlSslMode::VerifyIdentity,
        TlsPolicy::SkipVerification => MySqlSslMode::Preferred,
    }
}

// Field order matters: the connection must drop before its runtime.
pub struct MySqlSession {
    conn: MySqlConnection,
    runtime: Runtime,
}

impl Session for MySqlSession {
    fn execute(&mut self, statement: &BoundStatement, kind: StatementKind) -> Result<QueryOutcome> {
        let query = statement
            .values
            .iter()
            .fold(sqlx::query(&statement.sql), bind_value);

        match kind {
            StatementKind::Select => {
                let rows = self.runtime.block_on(query.fetch_all(&mut self.conn))?;
                let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
                Ok(QueryOutcome::Rows(decoded))
            }
            StatementKind::Command => {
                self.runtime.block_on(query.execute(&mut self.conn))?;
                Ok(QueryOutcome::Done)
            }
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.raw("START TRANSACTION")
    }

    fn commit(&mut self) -> Result<()> {
        self.raw("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.raw("ROLLBACK")
    }

    fn last_insert_id(&mut self) -> Result<Option<u64>> {
        let id: u64 = self.runtime.block_on(
            sqlx::query_scalar("SELECT LAST_INSERT_ID()").fetch_one(&mut self.conn),
        )?;
        Ok(Some(id).filter(|id| *id > 0))
    }

    fn set_time_zone(&mut self, offset: &str) -> Result<()> {
        self.runtime.block_on(
            sqlx::query("SET time_zone = ?")
                .bind(offset.to_string())
                .execute(&mut self.conn),
        )?;
        Ok(())
    }

    fn server_info(&mut self) -> Result<String> {
        let version: String = self
            .runtime
            .block_on(sqlx::query_scalar("SELECT VERSION()").fetch_one(&mut self.conn))?;
        Ok(version)
    }

    fn client_info(&self) -> String {
        "sqlx-mysql".to_string()
    }

    fn identifier_quote(&self) -> char {
        '`'
    }
}

impl MySqlSession {
    fn raw(&mut self, sql: &str) -> Result<()> {
        self.runtime.block_on((&mut self.conn).execute(sql))?;
        Ok(())
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(f) => query.bind(*f),
        Value::Text(t) => query.bind(t.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Bool(b) => query.bind(*b),
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let is_null = row.try_get_raw(idx)?.is_null();
        let value = if is_null {
            Value::Null
        } else {
            decode_column(row, idx, column.type_info().name())?
        };
        values.push((column.name().to_string(), value));
    }
    Ok(Row::new(values))
}

// Unchecked reads: the column type name has already picked the Rust type.
fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> Result<Value> {
    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(idx)?),
        name if name.ends_with("UNSIGNED") => Value::UInt(row.try_get_unchecked::<u64, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::Int(row.try_get_unchecked::<i64, _>(idx)?)
        }
        "FLOAT" => Value::Float(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "DATETIME" | "TIMESTAMP" => Value::Text(match row.try_get_unchecked::<NaiveDateTime, _>(idx) {
            Ok(datetime) => format!("{}{}", datetime.format(DATETIME_FORMAT), fraction(datetime.nanosecond() / 1000)),
            Err(err) => raw_temporal(row, idx, Temporal::DateTime).ok_or(err)?,
        }),
        "DATE" => Value::Text(match row.try_get_unchecked::<NaiveDate, _>(idx) {
            Ok(date) => date.to_string(),
            Err(err) => raw_temporal(row, idx, Temporal::Date).ok_or(err)?,
        }),
        "TIME" => Value::Text(match row.try_get_unchecked::<NaiveTime, _>(idx) {
            Ok(time) => format!("{}{}", time.format(TIME_FORMAT), fraction(time.nanosecond() / 1000)),
            Err(err) => raw_temporal(row, idx, Temporal::Time).ok_or(err)?,
        }),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" | "GEOMETRY" => {
            Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?)
        }
        _ => Value::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Temporal {
    Date,
    DateTime,
    Time,
}

fn fraction(micros: u32) -> String {
    if micros == 0 {
        String::new()
    } else {
        format!(".{:06}", micros)
    }
}

/// Reads a temporal cell chrono rejects: zero dates (`0000-00-00`) and
/// TIME values outside a single day (`-24:00:00`, `838:59:59`).
fn raw_temporal(row: &MySqlRow, idx: usize, kind: Temporal) -> Option<String> {
    let raw = row.try_get_unchecked::<Vec<u8>, _>(idx).ok()?;
    format_temporal(&raw, kind)
}

/// Formats a temporal value as MySQL prints it.
///
/// The text protocol already carries the literal. The binary protocol sends
/// a length byte followed by the fields:
/// date/datetime: `year(u16) month day [hour minute second [micros(u32)]]`,
/// time: `negative days(u32) hour minute second [micros(u32)]`.
fn format_temporal(raw: &[u8], kind: Temporal) -> Option<String> {
    if raw.first().is_some_and(u8::is_ascii_digit) || raw.first() == Some(&b'-') {
        return String::from_utf8(raw.to_vec()).ok();
    }
    let (len, body) = raw.split_first()?;
    let body = body.get(..usize::from(*len))?;
    let byte = |i: usize| body.get(i).copied().unwrap_or(0);
    let word = |i: usize| u32::from_le_bytes([byte(i), byte(i + 1), byte(i + 2), byte(i + 3)]);

    let text = match kind {
        Temporal::Date | Temporal::DateTime => {
            let year = u16::from_le_bytes([byte(0), byte(1)]);
            let date = format!("{:04}-{:02}-{:02}", year, byte(2), byte(3));
            if kind == Temporal::Date {
                date
            } else {
                format!("{} {:02}:{:02}:{:02}{}", date, byte(4), byte(5), byte(6), fraction(word(7)))
            }
        }
        Temporal::Time => {
            let sign = if byte(0) == 1 { "-" } else { "" };
            let hours = u64::from(word(1)) * 24 + u64::from(byte(5));
            format!("{}{:02}:{:02}:{:02}{}", sign, hours, byte(6), byte(7), fraction(word(8)))
        }
    };
    Some(text)
}
