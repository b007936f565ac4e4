//! Database error types and transient/terminal classification.

use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("connection error: {0}")]
    Connect(#[source] tokio_postgres::Error),

    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("query error: {0}")]
    Query(#[source] tokio_postgres::Error),

    #[error("unexpected result shape: {0}")]
    UnexpectedShape(String),
}

/// Result type alias using `DatabaseError`.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Whether a query-time error should trigger a reconnect (transient) or
/// end the process (terminal), per the classification in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Terminal,
}

/// Classifies a `tokio_postgres::Error` as transient (connection dropped,
/// protocol-level hiccup — reconnect and retry) or terminal (schema drift,
/// missing columns — exit non-zero, the caller must fix the schema).
pub fn classify(err: &tokio_postgres::Error) -> ErrorClass {
    if err.is_closed() {
        return ErrorClass::Transient;
    }
    if let Some(db_error) = err.as_db_error() {
        use tokio_postgres::error::SqlState;
        return match *db_error.code() {
            SqlState::CONNECTION_EXCEPTION
            | SqlState::CONNECTION_DOES_NOT_EXIST
            | SqlState::CONNECTION_FAILURE
            | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
            | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
            | SqlState::ADMIN_SHUTDOWN
            | SqlState::CRASH_SHUTDOWN
            | SqlState::CANNOT_CONNECT_NOW => ErrorClass::Transient,
            _ => ErrorClass::Terminal,
        };
    }
    // No structured DB error: treat IO/protocol-level failures (EOF mid
    // round-trip, etc.) as transient, matching §7's "protocol error,
    // connection drop mid-query" case.
    ErrorClass::Transient
}
