//! Error types for objsync-core
//!
//! Every failure the engine can observe is one [`Error`] variant. The
//! [`ErrorClass`] of an error decides how the scheduler treats it: retry,
//! surface per instruction, or halt the whole run.

use thiserror::Error;

/// Result type alias for objsync-core
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine and its storage collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// A local or remote entry could not be read
    #[error("Access error: {path}: {message}")]
    Access { path: String, message: String },

    /// Connection reset, socket timeout, 5xx or throttling response
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend redirected a request mid-stream; the body must be re-sent
    #[error("Redirected: {0}")]
    Redirect(String),

    /// Malformed or rejected request
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Access denied: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Local storage is out of space
    #[error("Out of disk space: {0}")]
    ResourceExhausted(String),

    /// Declared and received sizes (or checksums) disagree
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

/// How the engine reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unreadable entry; reported per candidate, never fatal
    Access,
    /// Likely to succeed on retry
    Transient,
    /// Retrying cannot change the outcome
    Permanent,
    /// Local disk exhausted; halts dispatch for the whole run
    ResourceExhaustion,
    /// Size or checksum mismatch; retried like a transient failure
    Integrity,
    Cancelled,
}

impl Error {
    /// Build an access error for a path
    pub fn access(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Access {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an I/O error observed while touching `path`.
    ///
    /// Disk exhaustion and transport-like kinds keep their own class; other
    /// failures become access errors carrying the path.
    pub fn from_io(path: impl Into<String>, err: std::io::Error) -> Self {
        match classify_io(&err) {
            ErrorClass::ResourceExhaustion => {
                Error::ResourceExhausted(format!("{}: {err}", path.into()))
            }
            ErrorClass::Transient => Error::Io(err),
            _ => Error::access(path, err),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Access { .. } => ErrorClass::Access,
            Error::Transport(_) | Error::Redirect(_) => ErrorClass::Transient,
            Error::Request(_)
            | Error::Auth(_)
            | Error::NotFound(_)
            | Error::InvalidPath(_)
            | Error::Config(_)
            | Error::General(_) => ErrorClass::Permanent,
            Error::ResourceExhausted(_) => ErrorClass::ResourceExhaustion,
            Error::Integrity(_) => ErrorClass::Integrity,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::Io(e) => classify_io(e),
        }
    }

    /// Whether the shared retry policy should try again
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Integrity)
    }

    /// Whether this error stops dispatch for the whole run
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::ResourceExhaustion | ErrorClass::Cancelled
        )
    }
}

fn classify_io(err: &std::io::Error) -> ErrorClass {
    use std::io::ErrorKind;

    if is_out_of_space(err) {
        return ErrorClass::ResourceExhaustion;
    }

    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::Interrupted
        | ErrorKind::UnexpectedEof => ErrorClass::Transient,
        ErrorKind::PermissionDenied | ErrorKind::NotFound => ErrorClass::Access,
        _ => ErrorClass::Permanent,
    }
}

fn is_out_of_space(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::StorageFull {
        return true;
    }

    // ENOSPC on Unix, ERROR_HANDLE_DISK_FULL / ERROR_DISK_FULL on Windows
    #[cfg(unix)]
    const OUT_OF_SPACE_CODES: &[i32] = &[28];
    #[cfg(windows)]
    const OUT_OF_SPACE_CODES: &[i32] = &[39, 112];
    #[cfg(not(any(unix, windows)))]
    const OUT_OF_SPACE_CODES: &[i32] = &[];

    err.raw_os_error()
        .is_some_and(|code| OUT_OF_SPACE_CODES.contains(&code))
}
