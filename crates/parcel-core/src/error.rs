use thiserror::Error;

pub type ParcelResult<T> = Result<T, ParcelError>;

/// Failures reported by an AEAD mode when finishing a decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AeadError {
    #[error("authentication tag mismatch")]
    TagMismatch,

    #[error("input of {len} bytes cannot hold a {tag_size}-byte tag")]
    Truncated { len: usize, tag_size: usize },

    #[error("cipher mode used before start")]
    NotStarted,
}

#[derive(Debug, Error)]
pub enum ParcelError {
    /// Key material too short or the wrong size for the requested operation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// AEAD tag verification failed (tampered or truncated ciphertext).
    #[error("integrity failure in {context}")]
    IntegrityFailure {
        context: &'static str,
        #[source]
        source: AeadError,
    },

    /// A content digest differs from the one supplied up front.
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Decrypted byte count disagrees with the attachment manifest.
    #[error("database integrity error: {0}")]
    DatabaseIntegrity(String),

    /// A compressed stream could not be inflated.
    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("size limit exceeded: {written} bytes written, limit is {limit}")]
    SizeLimitExceeded { written: u64, limit: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream was already closed, or an earlier stage failed.
    #[error("stream is closed")]
    StreamClosed,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParcelError {
    pub fn integrity(context: &'static str, source: AeadError) -> Self {
        Self::IntegrityFailure { context, source }
    }

    /// True for the errors that indicate tampered or corrupted content, as
    /// opposed to caller mistakes or I/O trouble.
    pub fn is_integrity_related(&self) -> bool {
        matches!(
            self,
            Self::IntegrityFailure { .. } | Self::HashMismatch { .. } | Self::DatabaseIntegrity(_)
        )
    }
}
