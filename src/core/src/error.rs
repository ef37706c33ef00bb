use thiserror::Error;

/// Diskferry error types
#[derive(Error, Debug)]
pub enum FerryError {
    /// The registry has no manifest for the requested reference.
    ///
    /// The `NAME_UNKNOWN: Unknown name` token is part of the message so that
    /// callers matching on registry error codes keep working.
    #[error("NAME_UNKNOWN: Unknown name: {reference}")]
    NameUnknown { reference: String },

    /// An image's layers carry overlapping, non-contiguous or missing
    /// `filename`/`range` annotations.
    #[error("malformed recipe: {0}")]
    MalformedRecipe(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure while writing a file segment.
    #[error("failed writing file '{filename}' at offset {offset}: {source} (retry pull; partial state is resumable)")]
    SegmentWrite {
        filename: String,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// A blob's computed digest does not match the digest the manifest
    /// declares for it.
    #[error("hash mismatch for blob {digest}: computed {computed}")]
    HashMismatch { digest: String, computed: String },

    /// Caller-supplied reference or path failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Cooperative cancellation fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Registry protocol error
    #[error("registry error: {0}")]
    Registry(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FerryError {
    fn from(err: serde_json::Error) -> Self {
        FerryError::Serialization(err.to_string())
    }
}

/// Result type alias for diskferry operations
pub type Result<T> = std::result::Result<T, FerryError>;
