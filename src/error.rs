use std::fmt::Display;
use std::io;

/// Engine errors.
#[derive(Debug)]
pub enum Error {
    /// An underlying file system failure, surfaced verbatim.
    Io(io::Error),
    /// Structurally invalid on-disk metadata (bad table footer or index).
    Corruption(String),
    /// A mutation was attempted on a closed engine.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::Closed => write!(f, "engine is closed"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

/// A tephra Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
