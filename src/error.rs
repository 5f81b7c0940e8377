use std::time::Duration;

/// Errors surfaced by remote archive listing and extraction.
#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    /// Fetching bytes of the remote archive failed.
    #[error("Failed to retrieve {remote_path}: {source}")]
    Retrieval {
        remote_path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The archive bytes do not form a valid ZIP structure.
    #[error("Invalid ZIP format: {0}")]
    Format(String),

    #[error("Unsupported ZIP feature: {0}")]
    Unsupported(String),

    /// Writing an extracted entry to disk failed.
    #[error("Failed to extract {entry}: {source}")]
    Extraction {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CRC mismatch for {entry}: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        entry: String,
        expected: u32,
        actual: u32,
    },

    /// Entry name would be written outside the destination directory.
    #[error("Refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZipError {
    pub(crate) fn retrieval(remote_path: &str, source: anyhow::Error) -> Self {
        ZipError::Retrieval {
            remote_path: remote_path.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ZipError::Format(msg.into())
    }

    pub(crate) fn extraction(entry: &str, source: std::io::Error) -> Self {
        ZipError::Extraction {
            entry: entry.to_string(),
            source,
        }
    }
}

pub type Result<T, E = ZipError> = std::result::Result<T, E>;
