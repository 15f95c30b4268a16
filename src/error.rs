//! Application error type.
//!
//! Every failure in the library surfaces as a [`TkError`]: a kind, the
//! `module::function` that raised it, a severity, a human message and an
//! optional payload (usually the offending input). There is no retry policy;
//! any error aborts the invocation and rolls back its transaction.

use std::fmt;

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TkError>;

/// Broad failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed transcript, unknown change-type code, empty tool-kit fan-out.
    Format,
    /// A referenced change request, component or tool kit does not exist.
    NotFound,
    /// Database constraint violation or connection failure.
    Persistence,
    /// Reading or appending to the transcript file failed.
    Io,
    /// A request that conflicts with existing state (duplicate name,
    /// guarded field change, out-of-range value).
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Format => "format error",
            ErrorKind::NotFound => "not found",
            ErrorKind::Persistence => "persistence error",
            ErrorKind::Io => "i/o error",
            ErrorKind::Invalid => "invalid request",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} in {origin}: {message}")]
pub struct TkError {
    pub kind: ErrorKind,
    pub origin: &'static str,
    pub severity: Severity,
    pub message: String,
    pub payload: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TkError {
    pub fn new(kind: ErrorKind, origin: &'static str, message: impl Into<String>) -> Self {
        let severity = match kind {
            ErrorKind::Persistence | ErrorKind::Io => Severity::Fatal,
            _ => Severity::Error,
        };
        Self {
            kind,
            origin,
            severity,
            message: message.into(),
            payload: None,
            source: None,
        }
    }

    pub fn format(origin: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, origin, message)
    }

    pub fn not_found(origin: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, origin, message)
    }

    pub fn invalid(origin: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, origin, message)
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Line printed to stderr by the CLI before exiting non-zero.
    pub fn report(&self) -> String {
        match &self.payload {
            Some(p) => format!("[{}] {} ({})", self.severity, self, p),
            None => format!("[{}] {}", self.severity, self),
        }
    }
}

impl From<sqlx::Error> for TkError {
    fn from(err: sqlx::Error) -> Self {
        let mut e = TkError::new(ErrorKind::Persistence, "database", err.to_string());
        e.source = Some(Box::new(err));
        e
    }
}

impl From<std::io::Error> for TkError {
    fn from(err: std::io::Error) -> Self {
        let mut e = TkError::new(ErrorKind::Io, "io", err.to_string());
        e.source = Some(Box::new(err));
        e
    }
}
