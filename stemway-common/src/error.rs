//! Common error types for Stemway services

use thiserror::Error;

/// Common result type for Stemway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Stemway microservices
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation conflicts with the current lifecycle state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Uploaded chunk content does not match the hash supplied by the client
    #[error("Checksum mismatch for chunk {chunk_index}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        chunk_index: u32,
        expected: String,
        computed: String,
    },

    /// Illegal state machine transition
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
