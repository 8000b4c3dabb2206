//! Error types for blobcache

use std::fmt;
use std::io;

use crate::registry::CacheHandle;

/// Result type alias for blobcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the fallible edges of the cache: configuration and
/// handle bookkeeping. Cache loads and stores themselves never fail.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Config could not be parsed
    Parse(String),

    /// Config parsed but holds values the cache cannot use
    InvalidConfig(String),

    /// Handle kind is not served by the registry
    UnsupportedHandle(CacheHandle),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            Error::UnsupportedHandle(handle) => {
                write!(f, "Unsupported cache handle: {}", handle)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
