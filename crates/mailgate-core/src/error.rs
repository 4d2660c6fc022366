//! Error types for the core library.
//!
//! None of these cross a stage boundary at request time: topology errors
//! stop assembly, directory errors become rejecting responses.

use thiserror::Error;

use crate::request::Protocol;

/// Errors detected while assembling a chain, before any request is served.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A terminal stage was given a successor.
    #[error("stage `{kind}` at {path} is terminal and cannot have a next stage")]
    TerminalStage {
        /// Stage kind.
        kind: &'static str,
        /// Location in the configuration.
        path: String,
    },

    /// A decorating stage has nothing to delegate to.
    #[error("stage `{kind}` at {path} requires a next stage")]
    MissingNext {
        /// Stage kind.
        kind: &'static str,
        /// Location in the configuration.
        path: String,
    },

    /// A fan-out with no alternatives.
    #[error("any_of at {0} has no stages")]
    EmptyAnyOf(String),

    /// A method gate that allows nothing.
    #[error("method_gate at {0} allows no methods")]
    EmptyMethods(String),

    /// The same protocol was routed twice.
    #[error("duplicate endpoint for protocol {0}")]
    DuplicateEndpoint(Protocol),

    /// Throttle bounds are not `0 < base <= max`.
    #[error("invalid throttle delays: base {base}, max {max}")]
    InvalidDelay {
        /// Base delay in seconds.
        base: u32,
        /// Maximum delay in seconds.
        max: u32,
    },

    /// The mailbox directory client could not be created.
    #[error("mailbox directory: {0}")]
    Directory(#[from] DirectoryError),
}

/// Errors talking to the mailbox directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Transport failure, including timeouts.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured base address is not a URL.
    #[error("invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
