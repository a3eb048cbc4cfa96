/// Core Module for CRDash
///
/// Shared infrastructure for the dashboard: the database access layer and
/// the crate-wide error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{CrdError, Result};
