//! Error types for window-relay.
//!
//! `WouldBlock` and end-of-stream are not errors here: they are ordinary
//! outcomes of non-blocking calls and live in the transport result enums.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Misuse of a [`ByteWindow`](crate::runtime::ByteWindow) cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    /// `put` asked for more room than `limit - position`.
    #[error("window overflow: {requested} bytes requested, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },

    /// `get` asked for more bytes than `limit - position`.
    #[error("window underflow: {requested} bytes requested, {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },

    /// `reset` without a live mark.
    #[error("reset called without a valid mark")]
    InvalidMark,
}

/// Failure of a transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation on a transport that has already been closed.
    #[error("transport is closed")]
    Closed,

    /// Operation not offered by this kind of endpoint.
    #[error("{op} is not supported on a {kind} transport")]
    Unsupported {
        op: &'static str,
        kind: &'static str,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to acquire or write a file sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Create-new policy: the destination is never overwritten.
    #[error("destination '{}' already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    FileRead(PathBuf, #[source] io::Error),

    #[error("failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,
}

/// Any per-transport failure seen by the dispatch loop.
///
/// These are caught at the per-event boundary and turned into a close of
/// the offending transport.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
