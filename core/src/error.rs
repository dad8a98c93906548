//! Error types for Warden

use thiserror::Error;

/// Core error type for Warden operations.
///
/// Verification outcomes (a broken chain, a wrong one-time code) are not
/// errors; they are reported as values. This type is reserved for faults
/// that make a call meaningless, such as a secret that is not valid base32.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid base32 character {character:?} at position {position}")]
    Base32 { character: char, position: usize },

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("MFA not enrolled for user: {user_id}")]
    NotEnrolled { user_id: String },

    #[error("{0}")]
    Other(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
