//! Error types for the TaskNet core crate.

use std::fmt;

/// Errors related to cryptographic operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// The signature is malformed or invalid.
    InvalidSignature,
    /// The public key is malformed or invalid.
    InvalidPublicKey,
    /// Signature verification failed (signature doesn't match message/key).
    SignatureVerificationFailed,
    /// A network-auth token was presented but no network key is configured.
    MissingNetKey,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidSignature => write!(f, "invalid signature format"),
            CryptoError::InvalidPublicKey => write!(f, "invalid public key format"),
            CryptoError::SignatureVerificationFailed => write!(f, "signature verification failed"),
            CryptoError::MissingNetKey => write!(f, "no network key configured"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Errors related to serialization and deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerializationError {
    /// Failed to encode data to bytes.
    EncodeFailed(String),
    /// Failed to decode data from bytes.
    DecodeFailed(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::EncodeFailed(msg) => write!(f, "encode failed: {}", msg),
            SerializationError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for SerializationError {}
