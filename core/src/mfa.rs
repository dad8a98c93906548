//! Multi-factor credential lifecycle on top of the TOTP engine
//!
//! The engine in [`crate::totp`] is pure. This module adds the parts that
//! touch stored credentials: enrollment, confirmation, backup code
//! redemption and disabling. Storage is reached through [`CredentialStore`],
//! which the embedding application implements against its own database.
//!
//! Outcomes handed back to callers are a bare [`Verdict`]. Why a check
//! failed (unknown code, not enabled, stale step) is only logged.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::totp::{hash_backup_code, verify_totp, TotpEngine};

/// Stored second-factor state for one user.
///
/// Backup codes are held only as hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaCredential {
    pub secret: Option<String>,
    pub backup_code_hashes: Vec<String>,
    pub enabled: bool,
}

/// Persistence collaborator for MFA credentials.
///
/// Methods take `&self`; implementations own their locking.
/// [`CredentialStore::take_backup_code_hash`] must be atomic per user so a
/// code cannot be redeemed twice by racing requests.
pub trait CredentialStore {
    fn secret(&self, user_id: &str) -> Result<Option<String>>;

    fn set_secret(&self, user_id: &str, secret: Option<String>) -> Result<()>;

    fn backup_code_hashes(&self, user_id: &str) -> Result<Vec<String>>;

    fn set_backup_code_hashes(&self, user_id: &str, hashes: Vec<String>) -> Result<()>;

    fn enabled(&self, user_id: &str) -> Result<bool>;

    fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<()>;

    /// Remove `hash` from the user's backup codes if present.
    ///
    /// Returns whether a hash was removed.
    fn take_backup_code_hash(&self, user_id: &str, hash: &str) -> Result<bool>;
}

/// In-process credential store guarded by a single lock.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, MfaCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's stored credential.
    pub fn credential(&self, user_id: &str) -> Result<Option<MfaCredential>> {
        let credentials = self.credentials.read().map_err(poisoned)?;
        Ok(credentials.get(user_id).cloned())
    }

    fn read<T>(&self, user_id: &str, f: impl FnOnce(&MfaCredential) -> T) -> Result<T> {
        let credentials = self.credentials.read().map_err(poisoned)?;
        let empty = MfaCredential::default();
        Ok(f(credentials.get(user_id).unwrap_or(&empty)))
    }

    fn write<T>(&self, user_id: &str, f: impl FnOnce(&mut MfaCredential) -> T) -> Result<T> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        Ok(f(credentials.entry(user_id.to_string()).or_default()))
    }
}

fn poisoned<E>(_: E) -> Error {
    Error::Store("credential lock poisoned".to_string())
}

impl CredentialStore for MemoryCredentialStore {
    fn secret(&self, user_id: &str) -> Result<Option<String>> {
        self.read(user_id, |c| c.secret.clone())
    }

    fn set_secret(&self, user_id: &str, secret: Option<String>) -> Result<()> {
        self.write(user_id, |c| c.secret = secret)
    }

    fn backup_code_hashes(&self, user_id: &str) -> Result<Vec<String>> {
        self.read(user_id, |c| c.backup_code_hashes.clone())
    }

    fn set_backup_code_hashes(&self, user_id: &str, hashes: Vec<String>) -> Result<()> {
        self.write(user_id, |c| c.backup_code_hashes = hashes)
    }

    fn enabled(&self, user_id: &str) -> Result<bool> {
        self.read(user_id, |c| c.enabled)
    }

    fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<()> {
        self.write(user_id, |c| c.enabled = enabled)
    }

    fn take_backup_code_hash(&self, user_id: &str, hash: &str) -> Result<bool> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        let Some(credential) = credentials.get_mut(user_id) else {
            return Ok(false);
        };
        match credential
            .backup_code_hashes
            .iter()
            .position(|stored| stored == hash)
        {
            Some(index) => {
                credential.backup_code_hashes.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Outcome of a second-factor check as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    fn from_bool(valid: bool) -> Self {
        if valid {
            Verdict::Valid
        } else {
            Verdict::Invalid
        }
    }
}

/// Material shown to a user once at enrollment.
///
/// # Fields
/// - `secret`: Base32 shared secret for manual entry.
/// - `otpauth_uri`: Provisioning URI for QR rendering.
/// - `backup_codes`: Plaintext recovery codes; only their hashes are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub secret: String,
    pub otpauth_uri: String,
    pub backup_codes: Vec<String>,
}

/// MFA workflows over a TOTP engine and a credential store.
pub struct MfaService<S> {
    engine: TotpEngine,
    store: S,
}

impl<S: CredentialStore> MfaService<S> {
    pub fn new(engine: TotpEngine, store: S) -> Self {
        Self { engine, store }
    }

    pub fn engine(&self) -> &TotpEngine {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issue a new secret and backup codes, replacing any previous ones.
    ///
    /// The credential stays disabled until [`MfaService::confirm_enrollment`]
    /// succeeds.
    pub fn enroll(&self, user_id: &str, email: &str) -> Result<Enrollment> {
        let secret = self.engine.generate_secret();
        let backup_codes = self
            .engine
            .generate_backup_codes(self.engine.config().backup_code_count);

        self.store.set_secret(user_id, Some(secret.clone()))?;
        self.store
            .set_backup_code_hashes(user_id, hash_all(&backup_codes))?;
        self.store.set_enabled(user_id, false)?;

        info!(user_id, "MFA enrollment started");
        Ok(Enrollment {
            otpauth_uri: self.engine.otpauth_uri(email, &secret),
            secret,
            backup_codes,
        })
    }

    /// Enable the credential once the user proves possession of the secret.
    pub fn confirm_enrollment(&self, user_id: &str, token: &str) -> Result<Verdict> {
        let secret = self.require_secret(user_id)?;
        let valid = verify_totp(&secret, token, self.engine.config().window)?;

        if valid {
            self.store.set_enabled(user_id, true)?;
            info!(user_id, "MFA enabled");
        } else {
            warn!(user_id, "MFA confirmation rejected: code mismatch");
        }
        Ok(Verdict::from_bool(valid))
    }

    /// Check a TOTP code for an enabled credential.
    pub fn verify_totp(&self, user_id: &str, token: &str) -> Result<Verdict> {
        if !self.store.enabled(user_id)? {
            warn!(user_id, "TOTP rejected: MFA not enabled");
            return Ok(Verdict::Invalid);
        }
        let secret = self.require_secret(user_id)?;
        let valid = verify_totp(&secret, token, self.engine.config().window)?;
        if !valid {
            warn!(user_id, "TOTP rejected: code mismatch");
        }
        Ok(Verdict::from_bool(valid))
    }

    /// Redeem a backup code. Each code succeeds at most once.
    ///
    /// Only an enabled credential accepts backup codes; before confirmation
    /// the code is rejected and left unused. Input is trimmed and upper-cased
    /// before hashing so codes typed in lowercase still match.
    pub fn verify_backup_code(&self, user_id: &str, code: &str) -> Result<Verdict> {
        if !self.store.enabled(user_id)? {
            warn!(user_id, "Backup code rejected: MFA not enabled");
            return Ok(Verdict::Invalid);
        }

        let normalized = code.trim().to_ascii_uppercase();
        let removed = self
            .store
            .take_backup_code_hash(user_id, &hash_backup_code(&normalized))?;

        if removed {
            info!(user_id, "Backup code redeemed");
        } else {
            warn!(user_id, "Backup code rejected: unknown or already used");
        }
        Ok(Verdict::from_bool(removed))
    }

    /// Replace all backup codes with a fresh set.
    pub fn regenerate_backup_codes(&self, user_id: &str) -> Result<Vec<String>> {
        self.require_secret(user_id)?;
        let codes = self
            .engine
            .generate_backup_codes(self.engine.config().backup_code_count);
        self.store
            .set_backup_code_hashes(user_id, hash_all(&codes))?;
        info!(user_id, count = codes.len(), "Backup codes regenerated");
        Ok(codes)
    }

    pub fn remaining_backup_codes(&self, user_id: &str) -> Result<usize> {
        Ok(self.store.backup_code_hashes(user_id)?.len())
    }

    pub fn is_enabled(&self, user_id: &str) -> Result<bool> {
        self.store.enabled(user_id)
    }

    /// Clear the secret and backup codes. The stored record itself is kept.
    pub fn disable(&self, user_id: &str) -> Result<()> {
        self.store.set_secret(user_id, None)?;
        self.store.set_backup_code_hashes(user_id, Vec::new())?;
        self.store.set_enabled(user_id, false)?;
        info!(user_id, "MFA disabled");
        Ok(())
    }

    fn require_secret(&self, user_id: &str) -> Result<String> {
        self.store
            .secret(user_id)?
            .ok_or_else(|| Error::NotEnrolled {
                user_id: user_id.to_string(),
            })
    }
}

fn hash_all(codes: &[String]) -> Vec<String> {
    codes.iter().map(|code| hash_backup_code(code)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totp::{current_unix_time, generate_totp};

    fn service() -> MfaService<MemoryCredentialStore> {
        MfaService::new(TotpEngine::default(), MemoryCredentialStore::new())
    }

    fn enroll_confirmed(mfa: &MfaService<MemoryCredentialStore>, user_id: &str) -> Enrollment {
        let enrollment = mfa.enroll(user_id, &format!("{}@example.com", user_id)).unwrap();
        let code = generate_totp(&enrollment.secret, current_unix_time()).unwrap();
        assert!(mfa.confirm_enrollment(user_id, &code).unwrap().is_valid());
        enrollment
    }

    #[test]
    fn test_enroll_stores_only_hashes() {
        let mfa = service();
        let enrollment = mfa.enroll("u1", "u1@example.com").unwrap();

        assert_eq!(enrollment.backup_codes.len(), 10);
        assert!(enrollment.otpauth_uri.starts_with("otpauth://totp/Warden:"));

        let stored = mfa.store().credential("u1").unwrap().unwrap();
        assert_eq!(stored.secret.as_deref(), Some(enrollment.secret.as_str()));
        assert!(!stored.enabled);
        for code in &enrollment.backup_codes {
            assert!(!stored.backup_code_hashes.contains(code));
            assert!(stored.backup_code_hashes.contains(&hash_backup_code(code)));
        }
    }

    #[test]
    fn test_confirm_then_verify() {
        let mfa = service();
        let enrollment = mfa.enroll("u1", "u1@example.com").unwrap();
        let code = generate_totp(&enrollment.secret, current_unix_time()).unwrap();

        assert_eq!(mfa.verify_totp("u1", &code).unwrap(), Verdict::Invalid);
        assert_eq!(mfa.confirm_enrollment("u1", "000000x").unwrap(), Verdict::Invalid);
        assert!(!mfa.is_enabled("u1").unwrap());

        assert!(mfa.confirm_enrollment("u1", &code).unwrap().is_valid());
        assert!(mfa.is_enabled("u1").unwrap());
        assert!(mfa.verify_totp("u1", &code).unwrap().is_valid());
    }

    #[test]
    fn test_backup_code_single_use() {
        let mfa = service();
        let enrollment = enroll_confirmed(&mfa, "u1");
        let code = enrollment.backup_codes[3].clone();

        assert!(mfa.verify_backup_code("u1", &code).unwrap().is_valid());
        assert_eq!(mfa.verify_backup_code("u1", &code).unwrap(), Verdict::Invalid);
        assert_eq!(mfa.remaining_backup_codes("u1").unwrap(), 9);
    }

    #[test]
    fn test_backup_code_lowercase_input() {
        let mfa = service();
        let enrollment = enroll_confirmed(&mfa, "u1");
        let typed = format!("  {}\n", enrollment.backup_codes[0].to_lowercase());
        assert!(mfa.verify_backup_code("u1", &typed).unwrap().is_valid());
    }

    #[test]
    fn test_backup_code_scoped_to_user() {
        let mfa = service();
        let first = enroll_confirmed(&mfa, "u1");
        enroll_confirmed(&mfa, "u2");
        assert_eq!(
            mfa.verify_backup_code("u2", &first.backup_codes[0]).unwrap(),
            Verdict::Invalid
        );
        assert_eq!(mfa.remaining_backup_codes("u1").unwrap(), 10);
    }

    #[test]
    fn test_backup_code_rejected_before_confirmation() {
        let mfa = service();
        let enrollment = mfa.enroll("u1", "u1@example.com").unwrap();
        let backup = enrollment.backup_codes[0].clone();

        assert_eq!(mfa.verify_backup_code("u1", &backup).unwrap(), Verdict::Invalid);
        assert_eq!(mfa.remaining_backup_codes("u1").unwrap(), 10);

        let code = generate_totp(&enrollment.secret, current_unix_time()).unwrap();
        assert!(mfa.confirm_enrollment("u1", &code).unwrap().is_valid());
        assert!(mfa.verify_backup_code("u1", &backup).unwrap().is_valid());
        assert_eq!(mfa.remaining_backup_codes("u1").unwrap(), 9);
    }

    #[test]
    fn test_backup_code_rejected_after_disable() {
        let mfa = service();
        let enrollment = enroll_confirmed(&mfa, "u1");
        mfa.disable("u1").unwrap();
        assert_eq!(
            mfa.verify_backup_code("u1", &enrollment.backup_codes[0]).unwrap(),
            Verdict::Invalid
        );
    }

    #[test]
    fn test_regenerate_invalidates_old_codes() {
        let mfa = service();
        let enrollment = enroll_confirmed(&mfa, "u1");
        let fresh = mfa.regenerate_backup_codes("u1").unwrap();

        assert_eq!(
            mfa.verify_backup_code("u1", &enrollment.backup_codes[0]).unwrap(),
            Verdict::Invalid
        );
        assert!(mfa.verify_backup_code("u1", &fresh[0]).unwrap().is_valid());
    }

    #[test]
    fn test_disable_clears_credential_but_keeps_record() {
        let mfa = service();
        mfa.enroll("u1", "u1@example.com").unwrap();
        mfa.disable("u1").unwrap();

        let stored = mfa.store().credential("u1").unwrap();
        assert_eq!(stored, Some(MfaCredential::default()));
        assert!(matches!(
            mfa.confirm_enrollment("u1", "123456"),
            Err(Error::NotEnrolled { .. })
        ));
        assert!(matches!(
            mfa.regenerate_backup_codes("u1"),
            Err(Error::NotEnrolled { .. })
        ));
    }

    #[test]
    fn test_unknown_user() {
        let mfa = service();
        assert!(!mfa.is_enabled("nobody").unwrap());
        assert_eq!(mfa.remaining_backup_codes("nobody").unwrap(), 0);
        assert_eq!(
            mfa.verify_backup_code("nobody", "ABCD-1234").unwrap(),
            Verdict::Invalid
        );
        assert!(mfa.store().credential("nobody").unwrap().is_none());
    }
}
