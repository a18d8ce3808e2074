//! Error types for the gateway.
//!
//! Two propagation styles, mirroring how callers hold (or don't hold) a
//! usable connection:
//!
//! - [`ConnectError`] and [`NotFoundError`] are returned synchronously from
//!   [`Registry::connect`](crate::Registry::connect) and
//!   [`Registry::find`](crate::Registry::find) — no connection object exists
//!   yet to carry the failure.
//! - [`DbError`] is failure-as-data: `query` and `transaction` never raise,
//!   the caller inspects [`DbError::kind`].

use serde::Serialize;
use thiserror::Error;

/// Errors opening a backend connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The URL matched no known backend scheme.
    #[error("unrecognized database url")]
    BadUrl,

    /// A connection with this name exists and still has pending requests.
    #[error("connection `{0}` still has pending requests")]
    NameInUse(String),

    /// The backend did not come up within the configured window.
    #[error("connect timed out after {0} ms")]
    Timeout(u64),

    /// sqlx driver failure (bad credentials, unreachable host, ...).
    #[error("driver error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// SQL Server driver failure.
    #[error("driver error: {0}")]
    Tds(#[from] tiberius::error::Error),

    /// TCP-level failure reaching a SQL Server host.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lookup failure for a connection name that was never registered.
#[derive(Debug, Error)]
#[error("no connection named `{0}`")]
pub struct NotFoundError(pub String);

/// Classifies a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A column type the codec deliberately does not decode.
    UnsupportedType,
    /// A malformed request (bad batch, out-of-range parameter, closed connection).
    InvalidArgument,
    /// A driver-reported error; the message passes through verbatim.
    Backend,
    /// A stale or duplicate completion, or an evicted pending request.
    ProtocolAnomaly,
}

/// A request failure carried as data in place of rows.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct DbError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedType, message)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, message)
    }

    pub(crate) fn anomaly(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolAnomaly, message)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        // Server-reported SQL errors keep their message verbatim; everything
        // else (I/O, pool, decode) is stringified.
        match err.as_database_error() {
            Some(db) => DbError::backend(db.message()),
            None => DbError::backend(err.to_string()),
        }
    }
}

impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(token) => DbError::backend(token.message()),
            _ => DbError::backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_display() {
        let e = ConnectError::NameInUse("orders".into());
        assert_eq!(e.to_string(), "connection `orders` still has pending requests");
        assert_eq!(ConnectError::Timeout(5000).to_string(), "connect timed out after 5000 ms");
    }

    #[test]
    fn db_error_serializes_kind() {
        let e = DbError::unsupported("TIMETZ");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "unsupported_type");
        assert_eq!(json["message"], "TIMETZ");
    }

    #[test]
    fn db_errors_compare_by_kind_and_message() {
        assert_eq!(DbError::invalid("x"), DbError::invalid("x"));
        assert_ne!(DbError::invalid("x"), DbError::backend("x"));
    }

    #[test]
    fn not_found_display() {
        assert_eq!(
            NotFoundError("t1".into()).to_string(),
            "no connection named `t1`"
        );
    }
}
