//! Key derivation using Argon2id
//!
//! Derives encryption keys from user passphrases using Argon2id, or takes a
//! device keystore secret as-is. Every sealed payload gets a fresh salt, so
//! the derivation parameters travel with the payload.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, Params,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{BackupResult, EncryptionFailure};

use super::secure_memory::{DeviceSecret, SecureString};

/// Parameters for key derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Salt for key derivation (base64 encoded)
    pub salt: String,
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            salt: String::new(), // Will be generated on first use
            memory_cost: 65536,  // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// Create new params with a random salt
    pub fn new() -> Self {
        let defaults = Self::default();
        Self::with_cost(defaults.memory_cost, defaults.time_cost, defaults.parallelism)
    }

    /// Create params with a random salt and explicit costs
    pub fn with_cost(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        let salt = SaltString::generate(&mut OsRng);
        Self {
            salt: salt.to_string(),
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Same costs, fresh salt
    pub fn reseeded(&self) -> Self {
        Self::with_cost(self.memory_cost, self.time_cost, self.parallelism)
    }
}

/// A derived encryption key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    /// The 32-byte key for AES-256
    key: [u8; 32],
}

impl DerivedKey {
    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Derive an encryption key from a passphrase
pub fn derive_key(passphrase: &str, params: &KeyDerivationParams) -> BackupResult<DerivedKey> {
    let salt = SaltString::from_b64(&params.salt)
        .map_err(|e| EncryptionFailure::Corrupted(format!("Invalid salt: {}", e)))?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32), // Output length for AES-256
    )
    .map_err(|e| EncryptionFailure::Failed(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| EncryptionFailure::Failed(format!("Key derivation failed: {}", e)))?;

    let hash_output = hash
        .hash
        .ok_or_else(|| EncryptionFailure::Failed("No hash output generated".to_string()))?;

    let hash_bytes = hash_output.as_bytes();
    if hash_bytes.len() < 32 {
        return Err(
            EncryptionFailure::Failed("Hash output too short for AES-256 key".to_string()).into(),
        );
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash_bytes[..32]);

    Ok(DerivedKey { key })
}

/// What a sealed payload was keyed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Passphrase,
    DeviceSecret,
}

/// Where encryption keys come from
#[derive(Debug, Clone)]
pub enum KeySource {
    /// A user passphrase, stretched with Argon2id using these costs
    Passphrase {
        passphrase: SecureString,
        params: KeyDerivationParams,
    },
    /// A secret held by the device keystore, used directly as the key
    Device(DeviceSecret),
}

impl KeySource {
    /// Passphrase with the default Argon2id costs
    pub fn passphrase(passphrase: impl Into<SecureString>) -> Self {
        Self::Passphrase {
            passphrase: passphrase.into(),
            params: KeyDerivationParams::new(),
        }
    }

    /// Passphrase with explicit Argon2id costs
    pub fn passphrase_with_cost(
        passphrase: impl Into<SecureString>,
        memory_cost: u32,
        time_cost: u32,
        parallelism: u32,
    ) -> Self {
        Self::Passphrase {
            passphrase: passphrase.into(),
            params: KeyDerivationParams::with_cost(memory_cost, time_cost, parallelism),
        }
    }

    /// Device keystore secret
    pub fn device(secret: [u8; 32]) -> Self {
        Self::Device(DeviceSecret::new(secret))
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            KeySource::Passphrase { .. } => KeyKind::Passphrase,
            KeySource::Device(_) => KeyKind::DeviceSecret,
        }
    }

    /// Derive a key for sealing a new payload
    ///
    /// Returns the key and, for passphrases, the freshly salted parameters
    /// that must be stored alongside the payload.
    pub fn key_for_seal(&self) -> BackupResult<(DerivedKey, Option<KeyDerivationParams>)> {
        match self {
            KeySource::Passphrase { passphrase, params } => {
                let params = params.reseeded();
                let key = derive_key(passphrase, &params)?;
                Ok((key, Some(params)))
            }
            KeySource::Device(secret) => Ok((
                DerivedKey {
                    key: *secret.as_bytes(),
                },
                None,
            )),
        }
    }

    /// Re-derive the key a payload was sealed with
    pub fn key_for_open(&self, stored: Option<&KeyDerivationParams>) -> BackupResult<DerivedKey> {
        match (self, stored) {
            (KeySource::Passphrase { passphrase, .. }, Some(params)) => {
                derive_key(passphrase, params)
            }
            (KeySource::Device(secret), None) => Ok(DerivedKey {
                key: *secret.as_bytes(),
            }),
            (KeySource::Passphrase { .. }, None) => Err(EncryptionFailure::Corrupted(
                "Missing key derivation parameters".to_string(),
            )
            .into()),
            (KeySource::Device(_), Some(_)) => Err(EncryptionFailure::WrongKey.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_params() -> KeyDerivationParams {
        KeyDerivationParams::with_cost(1024, 1, 1)
    }

    #[test]
    fn test_derive_key() {
        let key = derive_key("test_passphrase", &cheap_params()).unwrap();
        assert_eq!(key.as_bytes().len(), 32);
    }

    #[test]
    fn test_same_passphrase_same_key() {
        let params = cheap_params();
        let key1 = derive_key("test_passphrase", &params).unwrap();
        let key2 = derive_key("test_passphrase", &params).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_passphrase_different_key() {
        let params = cheap_params();
        let key1 = derive_key("passphrase1", &params).unwrap();
        let key2 = derive_key("passphrase2", &params).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_reseeded_params_change_salt_only() {
        let params = cheap_params();
        let next = params.reseeded();
        assert_ne!(params.salt, next.salt);
        assert_eq!(params.memory_cost, next.memory_cost);
    }

    #[test]
    fn test_default_costs() {
        let params = KeyDerivationParams::new();
        assert_eq!(params.memory_cost, 65536);
        assert_eq!(params.time_cost, 3);
        assert!(!params.salt.is_empty());
    }

    #[test]
    fn test_seal_and_open_keys_agree() {
        let source = KeySource::passphrase_with_cost("open sesame", 1024, 1, 1);
        let (seal_key, params) = source.key_for_seal().unwrap();
        let open_key = source.key_for_open(params.as_ref()).unwrap();
        assert_eq!(seal_key.as_bytes(), open_key.as_bytes());
    }

    #[test]
    fn test_device_key_is_the_secret() {
        let source = KeySource::device([9u8; 32]);
        let (key, params) = source.key_for_seal().unwrap();
        assert!(params.is_none());
        assert_eq!(key.as_bytes(), &[9u8; 32]);
        assert_eq!(source.kind(), KeyKind::DeviceSecret);
    }
}
