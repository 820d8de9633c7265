//! Translation of query outcomes into serving-layer responses.
//!
//! A request handler calls [`lookup`] and serializes the result however it
//! likes. [`LookupResponse::status`] and [`LookupResponse::message`] give
//! the `{status, value | message}` shape clients expect: status `0` with
//! the value on a hit, status `1` with an error message otherwise.

use tracing::{trace, warn};

use crate::{Db, DbError};

/// Status code of a successful lookup.
pub const STATUS_OK: u8 = 0;

/// Status code of a lookup that produced no value.
pub const STATUS_ERR: u8 = 1;

/// Outcome of a [`lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResponse {
    /// The key holds `value`.
    Found { value: String },

    /// The key was never written or its newest record is a delete.
    Absent,

    /// The lookup failed for any other reason.
    Failed { message: String },
}

impl LookupResponse {
    pub fn status(&self) -> u8 {
        match self {
            LookupResponse::Found { .. } => STATUS_OK,
            LookupResponse::Absent | LookupResponse::Failed { .. } => STATUS_ERR,
        }
    }

    /// The value on a hit.
    pub fn value(&self) -> Option<&str> {
        match self {
            LookupResponse::Found { value } => Some(value),
            _ => None,
        }
    }

    /// Error text for a miss or failure, `None` on a hit.
    pub fn message(&self) -> Option<String> {
        match self {
            LookupResponse::Found { .. } => None,
            LookupResponse::Absent => Some(DbError::NotFound.to_string()),
            LookupResponse::Failed { message } => Some(message.clone()),
        }
    }
}

/// Queries `key` and converts the outcome into a [`LookupResponse`].
pub fn lookup(db: &Db, key: &str) -> LookupResponse {
    match db.query(key) {
        Ok(value) => {
            trace!(key, "lookup hit");
            LookupResponse::Found { value }
        }
        Err(DbError::NotFound) => {
            trace!(key, "lookup miss");
            LookupResponse::Absent
        }
        Err(e) => {
            warn!(key, error = %e, "lookup failed");
            LookupResponse::Failed {
                message: e.to_string(),
            }
        }
    }
}
