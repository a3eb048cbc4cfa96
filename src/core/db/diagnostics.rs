/// Diagnostics Module
///
/// Connection status reporting. Reading the status never opens a
/// connection; metadata is only read when one is already open.

use super::Database;
use crate::config::Environment;
use crate::core::CrdError;
use serde::Serialize;

/// Snapshot of the database layer's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub connected: bool,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
    /// Set when metadata could not be read from an open connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Database {
    pub fn status(&self) -> Status {
        let mut status = Status {
            connected: self.is_connected(),
            environment: self.environment(),
            server_info: None,
            client_info: None,
            error: None,
        };

        let Some(handle) = self.cached_connection() else {
            return status;
        };

        let metadata = handle.with_session(|session| {
            let server = session.server_info()?;
            Ok((server, session.client_info()))
        });
        match metadata {
            Ok((server, client)) => {
                status.server_info = Some(server);
                status.client_info = Some(client);
            }
            Err(err) => {
                let err = CrdError::Diagnostic(err.to_string());
                self.log_error(&err.to_string());
                status.error = Some(err.to_string());
            }
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Params;
    use crate::test_utils::{mock_database, sqlite_database, MockDriver};

    #[test]
    fn test_status_before_and_after_connect() {
        let fixture = sqlite_database();

        let before = fixture.db.status();
        assert!(!before.connected);
        assert_eq!(before.environment, Environment::Development);
        assert!(before.server_info.is_none());
        // reading status must not connect
        assert!(!fixture.db.is_connected());

        fixture.db.execute_query("SELECT 1 AS one", &Params::new()).unwrap();

        let after = fixture.db.status();
        assert!(after.connected);
        assert!(after.server_info.unwrap().starts_with("SQLite 3."));
        assert!(after.client_info.unwrap().contains("rusqlite"));
        assert!(after.error.is_none());
    }

    #[test]
    fn test_metadata_failure_is_reported_not_raised() {
        let fixture = mock_database(MockDriver::failing_metadata());
        fixture.db.connection().unwrap();

        let status = fixture.db.status();
        assert!(status.connected);
        assert!(status.server_info.is_none());
        assert!(status.error.unwrap().contains("Diagnostic error"));
    }

    #[test]
    fn test_status_serialization_omits_empty_fields() {
        let fixture = mock_database(MockDriver::new());
        let json = serde_json::to_string(&fixture.db.status()).unwrap();
        assert_eq!(json, r#"{"connected":false,"environment":"development"}"#);
    }
}
