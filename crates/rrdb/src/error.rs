//! Error and Result types for RRD operations.

use crate::def::ConsolFun;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for RRD operations.
pub type Result<T> = std::result::Result<T, RrdError>;

/// The error type for RRD operations.
#[derive(Debug, Error)]
pub enum RrdError {
    /// The URI does not exist in the backend on open.
    #[error("could not open {0} [non existent]")]
    NotFound(String),

    /// Underlying backend I/O error; database state is indeterminate.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database definition is structurally invalid.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Sample time is not strictly after the last update time.
    #[error("bad sample time {time}: last update was {last_update}, at least one second step is required")]
    InvalidTimestamp {
        /// Rejected sample timestamp (seconds).
        time: i64,
        /// Timestamp of the last successful update (seconds).
        last_update: i64,
    },

    /// Lookup by datasource name found no match.
    #[error("unknown datasource: {0}")]
    UnknownDatasource(String),

    /// Lookup by (consolidation function, steps) found no match.
    #[error("unknown archive: {consol_fun}/{steps}")]
    UnknownArchive {
        /// Requested consolidation function.
        consol_fun: ConsolFun,
        /// Requested steps-per-row multiple.
        steps: i64,
    },

    /// The fetch planner found no archive with the requested consolidation
    /// function.
    #[error("no archive with consolidation function {0}")]
    NoMatchingArchive(ConsolFun),

    /// Operation on a closed database.
    #[error("database already closed")]
    Closed,

    /// `copy_state_to` target is not a compatible database.
    #[error("incompatible copy target: {0}")]
    IncompatibleCopy(String),

    /// Malformed fetch request (empty range, non-positive resolution).
    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),

    /// Backend factory or stored-data decoding failure.
    #[error("backend error: {0}")]
    Backend(String),
}
