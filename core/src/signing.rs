//! Ed25519 signatures over link hashes
//!
//! A link's signature covers its *unsigned hash*: the link digest computed
//! with the signature field left out. With `include_signature = false` that
//! is exactly the stored `link.hash`; otherwise the stored hash additionally
//! commits to the signature. See [`HashChain::create_signed_link`] and
//! [`HashChain::verify_link_signature`].
//!
//! Keys and signatures travel as lowercase hex: a 32-byte secret seed, a
//! 32-byte public key and a 64-byte signature over the UTF-8 bytes of the
//! hash string.
//!
//! [`HashChain::create_signed_link`]: crate::hash_chain::HashChain::create_signed_link
//! [`HashChain::verify_link_signature`]: crate::hash_chain::HashChain::verify_link_signature

use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Hex-encoded Ed25519 key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub secret_key: String,
    pub public_key: String,
}

/// Generate a fresh key pair from the OS random source.
pub fn generate_keypair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    KeyPair {
        secret_key: hex::encode(signing_key.to_bytes()),
        public_key: public_key_hex(&signing_key),
    }
}

/// Parse a hex secret seed.
pub fn signing_key_from_hex(text: &str) -> Result<SigningKey> {
    let seed = decode_fixed::<SECRET_KEY_LENGTH>(text, "secret key")?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Parse a hex public key.
pub fn verifying_key_from_hex(text: &str) -> Result<VerifyingKey> {
    let bytes = decode_fixed::<PUBLIC_KEY_LENGTH>(text, "public key")?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| Error::Signature(e.to_string()))
}

/// Hex public key derived from a secret key.
pub fn public_key_hex(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().to_bytes())
}

/// Sign a digest string, returning the hex signature.
pub fn sign_hash(signing_key: &SigningKey, hash: &str) -> String {
    hex::encode(signing_key.sign(hash.as_bytes()).to_bytes())
}

/// Check a hex signature over a digest string.
///
/// Malformed signatures are a failed check, not an error.
pub fn verify_hash_signature(verifying_key: &VerifyingKey, hash: &str, signature: &str) -> bool {
    let bytes = match decode_fixed::<SIGNATURE_LENGTH>(signature, "signature") {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Rejecting signature: {}", e);
            return false;
        }
    };
    verifying_key
        .verify(hash.as_bytes(), &Signature::from_bytes(&bytes))
        .is_ok()
}

fn decode_fixed<const N: usize>(text: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(text.trim())
        .map_err(|e| Error::Signature(format!("{} is not valid hex: {}", what, e)))?;
    bytes.as_slice().try_into().map_err(|_| {
        Error::Signature(format!("{} must be {} bytes, got {}", what, N, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_hex_round_trip() {
        let pair = generate_keypair();
        assert_eq!(pair.secret_key.len(), SECRET_KEY_LENGTH * 2);
        assert_eq!(pair.public_key.len(), PUBLIC_KEY_LENGTH * 2);

        let signing_key = signing_key_from_hex(&pair.secret_key).unwrap();
        assert_eq!(public_key_hex(&signing_key), pair.public_key);
        verifying_key_from_hex(&pair.public_key).unwrap();
    }

    #[test]
    fn test_sign_and_verify_hash() {
        let pair = generate_keypair();
        let signing_key = signing_key_from_hex(&pair.secret_key).unwrap();
        let verifying_key = verifying_key_from_hex(&pair.public_key).unwrap();

        let signature = sign_hash(&signing_key, "abc123");
        assert_eq!(signature.len(), SIGNATURE_LENGTH * 2);
        assert!(verify_hash_signature(&verifying_key, "abc123", &signature));
        assert!(!verify_hash_signature(&verifying_key, "abc124", &signature));
    }

    #[test]
    fn test_forged_signatures_rejected() {
        let signer = signing_key_from_hex(&generate_keypair().secret_key).unwrap();
        let other = verifying_key_from_hex(&generate_keypair().public_key).unwrap();
        let signature = sign_hash(&signer, "abc123");

        assert!(!verify_hash_signature(&other, "abc123", &signature));

        let own = signer.verifying_key();
        let mut flipped = hex::decode(&signature).unwrap();
        flipped[0] ^= 0x01;
        assert!(!verify_hash_signature(&own, "abc123", &hex::encode(flipped)));
        assert!(!verify_hash_signature(&own, "abc123", "zz"));
        assert!(!verify_hash_signature(&own, "abc123", &signature[..64]));
        assert!(!verify_hash_signature(&own, "abc123", ""));
    }

    #[test]
    fn test_malformed_keys_are_errors() {
        assert!(matches!(signing_key_from_hex("not hex"), Err(Error::Signature(_))));
        assert!(matches!(signing_key_from_hex("abcd"), Err(Error::Signature(_))));
        assert!(matches!(verifying_key_from_hex(&"00".repeat(31)), Err(Error::Signature(_))));
    }

    #[test]
    fn test_secret_seed_is_deterministic() {
        let seed = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
        let signing_key = signing_key_from_hex(seed).unwrap();
        // RFC 8032 test 1 public key
        assert_eq!(
            public_key_hex(&signing_key),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
    }
}
