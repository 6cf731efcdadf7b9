//! SQLite storage backend for bastion.
//!
//! [`SqliteRepositoryProvider`] implements every repository trait from
//! `bastion_core::repositories` on top of a single [`sqlx::SqlitePool`].
//! Timestamps are stored as unix seconds, structured fields (locations,
//! event metadata, forbidden patterns) as JSON text.
mod migrations;
pub mod repositories;

use std::{fmt::Display, str::FromStr};

use bastion_core::{Error, error::StorageError};
use chrono::{DateTime, Utc};

pub use migrations::SqliteMigrationManager;
pub use repositories::SqliteRepositoryProvider;

pub(crate) fn from_timestamp(ts: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| StorageError::Database(format!("Invalid timestamp {ts}")).into())
}

pub(crate) fn from_optional_timestamp(ts: Option<i64>) -> Result<Option<DateTime<Utc>>, Error> {
    ts.map(from_timestamp).transpose()
}

/// Parse a stored enum column.
pub(crate) fn parse_column<T>(value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StorageError::Database(format!("Corrupt column value: {e}")).into())
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::Database(format!("Failed to encode column: {e}")).into())
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, Error> {
    serde_json::from_str(value)
        .map_err(|e| StorageError::Database(format!("Failed to decode column: {e}")).into())
}
