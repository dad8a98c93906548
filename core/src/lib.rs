//! Warden Core - Security primitives for audit trails and second-factor auth
//!
//! This crate provides:
//! - Tamper-evident hash chains with backward verification
//! - Ed25519 signatures over link hashes
//! - RFC 6238 TOTP generation and verification
//! - Backup recovery codes and MFA credential lifecycle
//! - RFC 4648 base32 helpers
//! - Configuration loading

pub mod config;
pub mod encoding;
pub mod error;
pub mod hash_chain;
pub mod mfa;
pub mod signing;
pub mod totp;

pub use config::{default_config_path, WardenConfig};
pub use encoding::{base32_decode, base32_encode};
pub use error::{Error, Result};
pub use hash_chain::{
    deserialize_link, serialize_link, ChainConfig, ChainIssue, ChainStats, ChainVerification,
    DigestEncoding, Fork, HashAlgorithm, HashChain, Link, Metadata, NewLink,
};
pub use mfa::{CredentialStore, Enrollment, MemoryCredentialStore, MfaCredential, MfaService, Verdict};
pub use signing::{generate_keypair, signing_key_from_hex, verifying_key_from_hex, KeyPair};
pub use totp::{generate_totp, hash_backup_code, verify_totp, verify_totp_at, TotpConfig, TotpEngine};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::hash_chain::{ChainConfig, HashChain, Link, NewLink};
    pub use crate::mfa::{CredentialStore, MfaService, Verdict};
    pub use crate::totp::TotpEngine;
}
