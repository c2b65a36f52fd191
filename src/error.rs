//! Error types for AGI sessions and the FastAGI server

use crate::session::SessionState;
use thiserror::Error;

/// Result type alias for AGI operations
pub type AgiResult<T> = Result<T, AgiError>;

/// Errors surfaced by AGI sessions and the FastAGI server.
///
/// Session operations always propagate these to the caller; the server's
/// worker loop is the outermost boundary that logs and swallows them so a
/// single connection cannot take down the pool.
#[derive(Debug, Error)]
pub enum AgiError {
    /// The channel hung up mid-protocol. Expected whenever a caller
    /// disconnects; recoverable at the job boundary.
    #[error("channel hung up: {0}")]
    Hangup(String),

    /// Asterisk signaled that a wait-style command timed out
    /// (the response carried the `(timeout)` marker).
    #[error("timed out waiting for response from user: {raw}")]
    Timeout {
        /// Raw response line from Asterisk
        raw: String,
    },

    /// Asterisk reported an underlying channel failure (native result -1).
    #[error("channel failure in ({command})")]
    Channel {
        /// Command that triggered the failure
        command: String,
        /// Raw response line from Asterisk
        raw: String,
    },

    /// Malformed response, or a command-specific rejection
    /// (unknown application, unsupported channel feature).
    #[error("command error: {message}")]
    Command {
        /// What went wrong
        message: String,
        /// Raw response line from Asterisk, if one was received
        raw: Option<String>,
    },

    /// `initialize()` called on a session that is already past
    /// `Uninitialized`. Use [`reinitialize()`](crate::AgiSession::reinitialize)
    /// if a reset is intended.
    #[error("channel already initialized; use reinitialize() to reset")]
    AlreadyInitialized,

    /// A command was attempted while the session is not in the `Ready` state.
    #[error("session not ready for commands (state: {0:?})")]
    NotReady(SessionState),

    /// A user-supplied argument failed validation (newline injection,
    /// malformed digit set).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server could not bind its listening socket. Fatal at
    /// construction; typically the address is already in use.
    #[error("cannot bind to {addr}: {source}")]
    Bind {
        /// Address the server tried to bind
        addr: String,
        /// Underlying bind error
        source: std::io::Error,
    },

    /// Transport-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgiError {
    /// Create a command error with the raw offending line attached.
    pub fn command(message: impl Into<String>, raw: impl Into<String>) -> Self {
        AgiError::Command {
            message: message.into(),
            raw: Some(raw.into()),
        }
    }

    /// Raw response line associated with this error, if one was captured.
    pub fn raw_data(&self) -> Option<&str> {
        match self {
            AgiError::Timeout { raw } => Some(raw),
            AgiError::Channel { raw, .. } => Some(raw),
            AgiError::Command { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }

    /// `true` for errors a worker should treat as a normal end of call
    /// rather than a fault worth a stack-level log.
    pub fn is_hangup(&self) -> bool {
        matches!(self, AgiError::Hangup(_))
    }
}
