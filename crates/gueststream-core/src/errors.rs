use std::fmt;

use thiserror::Error;

/// Class of an [`AgentError`].
///
/// Callers decide how to react by looking at the kind: configuration and
/// construction errors make the component unusable, `Stream` errors force the
/// owner to rebuild the capture pipeline, `Cursor` errors are dropped where
/// they are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed codec / encoder / option string.
    Configuration,
    /// Display connection, missing extension, element creation or linking,
    /// no suitable encoder.
    Construction,
    /// No sample, end of stream or failed mapping while capturing.
    Stream,
    /// Cursor image rejected by the protocol limits.
    Cursor,
    /// Transport read/write failure.
    Io,
    /// Unexpected or malformed inbound message.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Construction  => "construction",
            Self::Stream        => "stream",
            Self::Cursor        => "cursor",
            Self::Io            => "io",
            Self::Protocol      => "protocol",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("{kind} error: {message}")]
pub struct AgentError {
    kind:    ErrorKind,
    message: String,
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn construction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Construction, message)
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Stream, message)
    }

    pub fn cursor(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cursor, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}
