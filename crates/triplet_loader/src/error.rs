//! src/error.rs
//!
//! Error type shared by every public operation of the loader.
//!
//! Configuration and lookup errors are raised synchronously by the registry.
//! Decode, shape and sampling errors happen inside a producer thread and reach
//! the consumer through the source's queue.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed decoder failure, kept `Send + Sync` so it can cross the queue.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("source '{0}' is not registered")]
    SourceNotFound(String),

    #[error("failed to decode image {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },

    #[error(
        "image {} has shape {found:?}, expected {expected:?} like the rest of the batch",
        path.display()
    )]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("triplet sampling failed: {0}")]
    Sampling(String),

    #[error("source '{0}' has terminated and has no more batches")]
    SourceExhausted(String),

    #[error("no batch from source '{name}' within {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("failed to spawn producer thread for source '{name}'")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_decode_error_keeps_source() {
        let err = LoaderError::Decode {
            path: PathBuf::from("001/c-001-01-01.png"),
            source: anyhow::anyhow!("truncated PNG stream").into(),
        };

        assert!(err.to_string().contains("001/c-001-01-01.png"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("truncated PNG stream"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoaderError>();
    }
}
