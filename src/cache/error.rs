//! Error types shared by the cache layer

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::codec::DecodeError;

/// Failures the cache cannot recover from on its own
///
/// Malformed filenames and corrupt payloads never show up here: the store
/// deletes those entries and reports a miss instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory or one of its files could not be accessed
    #[error("Cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A call argument could not be rendered for fingerprinting
    #[error("Unrepresentable call argument: {0}")]
    Arguments(#[from] serde_json::Error),

    /// A result value could not be serialized into a payload
    #[error("Result could not be encoded: {0}")]
    Encode(#[source] bincode::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur when reading an entry back
#[derive(Debug, Error)]
pub enum ReadError {
    /// The file was removed between the directory scan and the read
    #[error("Cache entry vanished before it could be read")]
    Vanished,

    /// The payload is corrupt or holds a different type
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result of a memoized call
///
/// `Call` carries the wrapped function's own error untouched; such results
/// are never written to the cache.
#[derive(Debug, Error)]
pub enum MemoError<E> {
    /// The wrapped computation failed
    #[error("{0}")]
    Call(E),

    /// The cache directory is unusable
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl<E> MemoError<E> {
    /// Returns the wrapped computation's error, if that is what failed
    pub fn into_call_error(self) -> Option<E> {
        match self {
            Self::Call(e) => Some(e),
            Self::Cache(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = CacheError::io(
            "/tmp/nowhere",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/nowhere"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_memo_error_call_passes_through() {
        let err: MemoError<String> = MemoError::Call("upstream timed out".to_string());
        assert_eq!(err.to_string(), "upstream timed out");
        assert_eq!(err.into_call_error().as_deref(), Some("upstream timed out"));
    }

    #[test]
    fn test_memo_error_cache_has_no_call_error() {
        let err: MemoError<String> =
            CacheError::io("/x", io::Error::new(io::ErrorKind::Other, "disk full")).into();
        assert!(err.to_string().contains("disk full"));
        assert!(err.into_call_error().is_none());
    }
}
