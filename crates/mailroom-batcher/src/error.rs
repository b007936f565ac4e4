//! Batching-loop error types.

use mailroom_database::DatabaseError;
use thiserror::Error;

/// Errors that end the batching loop's process with a non-zero exit,
/// per spec.md §7.
#[derive(Error, Debug)]
pub enum BatcherError {
    /// The initial connect (or its mandatory startup drain) failed.
    /// Spec.md §7: "Startup connect does not retry (it is the caller's
    /// job to restart the process on initial failure)."
    #[error("startup failed: {0}")]
    Startup(#[source] DatabaseError),

    /// A dequeue returned a terminal error (schema drift, missing
    /// columns) at any point after startup.
    #[error("terminal dequeue error: {0}")]
    Terminal(#[source] DatabaseError),
}
