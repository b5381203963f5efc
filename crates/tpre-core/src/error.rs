//! Error types for DKG sessions and re-encryption requests.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the DKG or answering re-encryption
/// requests.
///
/// Configuration errors surface before any network I/O. Cryptographic and
/// encoding errors are contained per message (they produce complaints or
/// rejections, not session failure). Liveness errors are terminal for the
/// session or request that hit them.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// This node's public key does not appear in the participant list
    #[error("Node public key not found in participant list")]
    NotAParticipant,

    /// Participant index outside the configured set
    #[error("Invalid participant index: {0}")]
    InvalidIndex(u32),

    /// An encrypted share could not be opened with the long-term key
    #[error("Share decryption failed: {0}")]
    Decryption(String),

    /// Commitment mismatch, invalid proof, or other verification failure
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Invalid message signature
    #[error("Invalid signature")]
    InvalidSignature,

    /// Malformed bytes or an encoding that is not a valid group element
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport failure; retried at the listener boundary
    #[error("Transport error: {0}")]
    Transport(String),

    /// Session deadline passed without certification
    #[error("Session deadline exceeded during {0}")]
    DeadlineExceeded(String),

    /// Session cancelled by the caller
    #[error("Session cancelled")]
    Cancelled,

    /// Not enough dealers survived certification
    #[error("Insufficient qualified dealers: required {required}, qualified {qualified}")]
    InsufficientQualifiedDealers { required: u32, qualified: u32 },

    /// Not enough valid re-encryption shares were collected
    #[error("Insufficient re-encryption shares: required {required}, collected {collected}")]
    InsufficientShares { required: u32, collected: u32 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
