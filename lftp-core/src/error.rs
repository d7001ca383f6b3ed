//! Error taxonomy shared by discovery, server and client.

use std::io;
use std::path::PathBuf;

use crate::path::PathError;
use crate::wire::{Command, WireError};

/// Top-level error. Per-connection errors end only that session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("authentication rejected")]
    Auth,
    #[error("filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),
    #[error("server already running on port {0}")]
    AlreadyRunning(u16),
    #[error("server not running")]
    NotRunning,
    #[error("root path {0} does not exist or is not a directory")]
    InvalidRoot(PathBuf),
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Error::Protocol(e.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("unexpected command {0:?}")]
    UnexpectedCommand(Command),
    #[error("filename length {0} out of range")]
    FilenameLength(usize),
    #[error("filename is not UTF-8")]
    FilenameNotUtf8,
    #[error("peer rejected the transfer")]
    Rejected,
    #[error("invalid session transition from {from:?} on {event}")]
    InvalidTransition {
        from: crate::session::SessionState,
        event: &'static str,
    },
}

impl From<WireError> for ProtocolError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::ShortRead { expected, got } => ProtocolError::ShortRead { expected, got },
            WireError::BadMagic(m) => ProtocolError::BadMagic(m),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilesystemError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),
    #[error("path rejected: {0}")]
    Containment(#[from] PathError),
    #[error("file too large for transfer: {0} bytes")]
    TooLarge(u64),
    #[error("{0}")]
    Io(#[source] io::Error),
}

impl From<PathError> for Error {
    fn from(e: PathError) -> Self {
        Error::Filesystem(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
