//! Time-based one-time passwords (RFC 6238) and backup recovery codes
//!
//! Codes are HOTP (RFC 4226) over a 30-second time step with HMAC-SHA1 and six
//! digits. These parameters are what every mainstream authenticator app
//! assumes, so they are fixed rather than configurable.
//!
//! All functions here are pure computations except the generators, which
//! draw from the thread-local CSPRNG. Persisting secrets and backup code
//! hashes belongs to the [`crate::mfa`] layer.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::encoding::{base32_decode, base32_encode};
use crate::error::{Error, Result};

/// Length of the time step in seconds.
pub const TIME_STEP_SECS: u64 = 30;

/// Number of digits in a generated code.
pub const CODE_DIGITS: usize = 6;

/// Secret length in bytes (160 bits).
pub const SECRET_BYTES: usize = 20;

/// Default number of time steps accepted on either side of now.
pub const DEFAULT_WINDOW: u32 = 1;

/// Default number of backup codes issued at enrollment.
pub const DEFAULT_BACKUP_CODE_COUNT: usize = 10;

const DEFAULT_ISSUER: &str = "Warden";
const CODE_MODULUS: u32 = 1_000_000;

/// Configuration for the TOTP engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TotpConfig {
    /// Issuer shown by authenticator apps
    pub issuer: String,
    /// Accepted clock drift in time steps
    pub window: u32,
    /// Backup codes issued per enrollment
    pub backup_code_count: usize,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            window: DEFAULT_WINDOW,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
        }
    }
}

/// TOTP engine bound to an issuer configuration.
///
/// Holds no per-user state and can be shared freely between threads.
#[derive(Debug, Clone, Default)]
pub struct TotpEngine {
    config: TotpConfig,
}

impl TotpEngine {
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    /// Generate a fresh 160-bit secret, base32-encoded (32 characters).
    pub fn generate_secret(&self) -> String {
        let mut secret = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret);
        base32_encode(&secret)
    }

    /// Generate `count` plaintext backup codes of the form `XXXX-XXXX`.
    ///
    /// The plaintext is meant to be shown once; store only
    /// [`hash_backup_code`] of each.
    pub fn generate_backup_codes(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let mut bytes = [0u8; 4];
                rng.fill_bytes(&mut bytes);
                let hex = hex::encode_upper(bytes);
                format!("{}-{}", &hex[..4], &hex[4..])
            })
            .collect()
    }

    /// Build the `otpauth://` provisioning URI for an account.
    pub fn otpauth_uri(&self, email: &str, secret: &str) -> String {
        let issuer = uri_component_encode(&self.config.issuer);
        format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}",
            issuer,
            uri_component_encode(email),
            secret,
            issuer
        )
    }

    /// Verify a code against the current time using the configured window.
    pub fn verify(&self, secret: &str, token: &str) -> Result<bool> {
        verify_totp(secret, token, self.config.window)
    }
}

/// Compute the RFC 4226 HOTP value for raw key bytes and a counter.
pub fn hotp(key: &[u8], counter: u64) -> Result<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key)
        .map_err(|e| Error::Other(format!("HMAC key rejected: {}", e)))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 section 5.3)
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    Ok(format!(
        "{:0width$}",
        binary % CODE_MODULUS,
        width = CODE_DIGITS
    ))
}

/// Compute the TOTP code for a base32 secret at a Unix time in seconds.
///
/// # Errors
///
/// Returns [`Error::Base32`] when the secret is not valid base32.
pub fn generate_totp(secret: &str, unix_seconds: u64) -> Result<String> {
    let key = base32_decode(secret)?;
    hotp(&key, time_step(unix_seconds))
}

/// Verify a code against the current time.
pub fn verify_totp(secret: &str, token: &str, window: u32) -> Result<bool> {
    verify_totp_at(secret, token, window, current_unix_time())
}

/// Verify a code against `unix_seconds`, accepting `window` steps either side.
///
/// Every candidate is compared in constant time and all `2 * window + 1`
/// candidates are computed regardless of where a match occurs. Steps before
/// the epoch are skipped.
pub fn verify_totp_at(secret: &str, token: &str, window: u32, unix_seconds: u64) -> Result<bool> {
    let key = base32_decode(secret)?;
    let step = time_step(unix_seconds);
    let window = u64::from(window);

    let mut matched = false;
    for counter in step.saturating_sub(window)..=step.saturating_add(window) {
        let candidate = hotp(&key, counter)?;
        matched |= constant_time_eq(candidate.as_bytes(), token.as_bytes());
    }
    Ok(matched)
}

/// SHA-256 of a plaintext backup code, hex-encoded.
pub fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Compare two byte strings without short-circuiting on the first difference.
///
/// Lengths are compared up front; code length is public.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Time-step counter for a Unix time in seconds.
pub fn time_step(unix_seconds: u64) -> u64 {
    unix_seconds / TIME_STEP_SECS
}

/// Seconds until the code for `unix_seconds` expires.
pub fn seconds_remaining(unix_seconds: u64) -> u64 {
    TIME_STEP_SECS - (unix_seconds % TIME_STEP_SECS)
}

/// Current Unix time in seconds.
pub fn current_unix_time() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// encodeURIComponent-compatible: unreserved marks stay literal
fn uri_component_encode(s: &str) -> String {
    let mut output = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => output.push(byte as char),
            _ => output.push_str(&format!("%{:02X}", byte)),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ASCII "12345678901234567890", the RFC 4226 / RFC 6238 SHA-1 test key
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_hotp_rfc4226_vectors() {
        let expected = [
            "755224", "287082", "359152", "969429", "338314", "254676", "287922", "162583",
            "399871", "520489",
        ];
        for (counter, code) in expected.iter().enumerate() {
            assert_eq!(hotp(b"12345678901234567890", counter as u64).unwrap(), *code);
        }
    }

    #[test]
    fn test_totp_rfc6238_vectors() {
        // Six-digit suffixes of the RFC 6238 appendix B SHA-1 values
        assert_eq!(generate_totp(RFC_SECRET, 0).unwrap(), "755224");
        assert_eq!(generate_totp(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(generate_totp(RFC_SECRET, 1111111109).unwrap(), "081804");
        assert_eq!(generate_totp(RFC_SECRET, 1111111111).unwrap(), "050471");
        assert_eq!(generate_totp(RFC_SECRET, 1234567890).unwrap(), "005924");
        assert_eq!(generate_totp(RFC_SECRET, 2000000000).unwrap(), "279037");
    }

    #[test]
    fn test_totp_deterministic_within_step() {
        let a = generate_totp(RFC_SECRET, 90).unwrap();
        let b = generate_totp(RFC_SECRET, 90).unwrap();
        let c = generate_totp(RFC_SECRET, 119).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c, "Same 30-second step yields the same code");
        assert_eq!(a.len(), CODE_DIGITS);
    }

    #[test]
    fn test_totp_rejects_bad_secret() {
        assert!(matches!(
            generate_totp("NOT-BASE32!", 0),
            Err(Error::Base32 { .. })
        ));
        assert!(verify_totp_at("0000", "123456", 1, 0).is_err());
    }

    #[test]
    fn test_verify_window() {
        let now = 1_700_000_000;
        let previous = generate_totp(RFC_SECRET, now - 30).unwrap();
        let next = generate_totp(RFC_SECRET, now + 30).unwrap();
        let stale = generate_totp(RFC_SECRET, now - 90).unwrap();

        assert!(verify_totp_at(RFC_SECRET, &previous, 1, now).unwrap());
        assert!(verify_totp_at(RFC_SECRET, &next, 1, now).unwrap());
        assert!(!verify_totp_at(RFC_SECRET, &stale, 1, now).unwrap());
        assert!(!verify_totp_at(RFC_SECRET, &previous, 0, now).unwrap());
        assert!(verify_totp_at(RFC_SECRET, &stale, 3, now).unwrap());
    }

    #[test]
    fn test_verify_near_epoch() {
        let code = generate_totp(RFC_SECRET, 0).unwrap();
        assert!(verify_totp_at(RFC_SECRET, &code, 2, 10).unwrap());
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let code = generate_totp(RFC_SECRET, 59).unwrap();
        assert!(!verify_totp_at(RFC_SECRET, &code[..5], 1, 59).unwrap());
        assert!(!verify_totp_at(RFC_SECRET, &format!("{}0", code), 1, 59).unwrap());
    }

    #[test]
    fn test_engine_verify_uses_current_time() {
        let engine = TotpEngine::default();
        let secret = engine.generate_secret();
        let code = generate_totp(&secret, current_unix_time()).unwrap();
        assert!(engine.verify(&secret, &code).unwrap());
    }

    #[test]
    fn test_generate_secret() {
        let engine = TotpEngine::default();
        let secret = engine.generate_secret();
        assert_eq!(secret.len(), 32);
        assert_eq!(base32_decode(&secret).unwrap().len(), SECRET_BYTES);
        assert_ne!(secret, engine.generate_secret());
    }

    #[test]
    fn test_generate_backup_codes_format() {
        let engine = TotpEngine::default();
        let codes = engine.generate_backup_codes(DEFAULT_BACKUP_CODE_COUNT);
        assert_eq!(codes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), 9);
            assert_eq!(&code[4..5], "-");
            assert!(code
                .chars()
                .filter(|c| *c != '-')
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
        assert!(engine.generate_backup_codes(0).is_empty());
    }

    #[test]
    fn test_hash_backup_code() {
        let hash = hash_backup_code("ABCD-1234");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_backup_code("ABCD-1234"));
        assert_ne!(hash, hash_backup_code("ABCD-1235"));
    }

    #[test]
    fn test_otpauth_uri() {
        let engine = TotpEngine::new(TotpConfig {
            issuer: "Acme Corp".to_string(),
            ..TotpConfig::default()
        });
        let uri = engine.otpauth_uri("alice+mfa@example.com", "JBSWY3DPEHPK3PXP");
        assert_eq!(
            uri,
            "otpauth://totp/Acme%20Corp:alice%2Bmfa%40example.com?secret=JBSWY3DPEHPK3PXP&issuer=Acme%20Corp"
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"123457"));
        assert!(!constant_time_eq(b"123456", b"12345"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_time_helpers() {
        assert_eq!(time_step(59), 1);
        assert_eq!(time_step(60), 2);
        assert_eq!(seconds_remaining(60), 30);
        assert_eq!(seconds_remaining(89), 1);
    }
}
