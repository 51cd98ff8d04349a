//! AES-256-GCM encryption/decryption
//!
//! Provides authenticated encryption for backup payloads. Each encryption
//! operation generates a unique nonce. Sealed payloads carry a key-check
//! block (a known constant encrypted under the same key) so that opening can
//! tell a wrong key apart from a damaged payload.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{BackupResult, EncryptionFailure};

use super::key_derivation::{DerivedKey, KeyDerivationParams, KeyKind, KeySource};

/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Tag identifying a sealed envelope
pub const SEALED_FORMAT: &str = "keepsafe-sealed";

/// Current envelope version
const ENVELOPE_VERSION: u8 = 1;

/// Plaintext of the key-check block
const KEY_CHECK_PLAINTEXT: &[u8] = b"keepsafe-key-check";

/// Encrypted data with associated metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    /// The nonce used for this encryption (base64 encoded)
    pub nonce: String,
    /// The encrypted ciphertext with authentication tag (base64 encoded)
    pub ciphertext: String,
}

impl EncryptedData {
    fn new(nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        }
    }

    fn decode_nonce(&self) -> Result<Vec<u8>, EncryptionFailure> {
        let nonce = STANDARD
            .decode(&self.nonce)
            .map_err(|e| EncryptionFailure::Corrupted(format!("Invalid nonce encoding: {}", e)))?;
        if nonce.len() != NONCE_SIZE {
            return Err(EncryptionFailure::Corrupted(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce.len()
            )));
        }
        Ok(nonce)
    }

    fn decode_ciphertext(&self) -> Result<Vec<u8>, EncryptionFailure> {
        STANDARD.decode(&self.ciphertext).map_err(|e| {
            EncryptionFailure::Corrupted(format!("Invalid ciphertext encoding: {}", e))
        })
    }
}

/// A sealed payload as stored at a destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Always `keepsafe-sealed`
    pub format: String,
    /// Envelope version for future algorithm upgrades
    pub version: u8,
    /// What the payload was keyed with
    pub key_kind: KeyKind,
    /// Argon2id parameters (passphrase keys only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KeyDerivationParams>,
    /// Known constant encrypted under the payload key
    pub key_check: EncryptedData,
    /// The encrypted payload
    pub payload: EncryptedData,
}

/// Encrypt plaintext data using AES-256-GCM
///
/// Generates a random nonce for each encryption operation.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> BackupResult<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| EncryptionFailure::Failed(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| EncryptionFailure::Failed(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedData::new(&nonce_bytes, &ciphertext))
}

/// Decrypt ciphertext using AES-256-GCM
///
/// An authentication failure is reported as `Corrupted`; AES-GCM alone
/// cannot tell a wrong key from tampered bytes.
pub fn decrypt(encrypted: &EncryptedData, key: &DerivedKey) -> BackupResult<Vec<u8>> {
    decrypt_checked(encrypted, key)?.ok_or_else(|| {
        EncryptionFailure::Corrupted("authentication failed".to_string()).into()
    })
}

/// Decrypt, returning `None` when the ciphertext does not authenticate
fn decrypt_checked(
    encrypted: &EncryptedData,
    key: &DerivedKey,
) -> Result<Option<Vec<u8>>, EncryptionFailure> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| EncryptionFailure::Failed(format!("Failed to create cipher: {}", e)))?;

    let nonce_bytes = encrypted.decode_nonce()?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = encrypted.decode_ciphertext()?;

    Ok(cipher.decrypt(nonce, ciphertext.as_ref()).ok())
}

/// Seal a payload into an envelope
pub fn seal(plaintext: &[u8], source: &KeySource) -> BackupResult<Vec<u8>> {
    let (key, kdf) = source.key_for_seal()?;

    let envelope = SealedEnvelope {
        format: SEALED_FORMAT.to_string(),
        version: ENVELOPE_VERSION,
        key_kind: source.kind(),
        kdf,
        key_check: encrypt(KEY_CHECK_PLAINTEXT, &key)?,
        payload: encrypt(plaintext, &key)?,
    };

    serde_json::to_vec(&envelope)
        .map_err(|e| EncryptionFailure::Failed(format!("Failed to serialize envelope: {}", e)).into())
}

/// Open a sealed envelope
///
/// - `MissingKey` if no key source is available
/// - `WrongKey` if the key check does not authenticate
/// - `Corrupted` if the envelope is malformed or the payload fails to
///   authenticate under a key that passed the check
pub fn open(bytes: &[u8], source: Option<&KeySource>) -> BackupResult<Vec<u8>> {
    let envelope: SealedEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| EncryptionFailure::Corrupted(format!("Malformed envelope: {}", e)))?;

    if envelope.format != SEALED_FORMAT {
        return Err(EncryptionFailure::Corrupted(format!(
            "Unexpected envelope format: {}",
            envelope.format
        ))
        .into());
    }

    if envelope.version != ENVELOPE_VERSION {
        return Err(EncryptionFailure::Failed(format!(
            "Unsupported encryption version: {}",
            envelope.version
        ))
        .into());
    }

    let source = source.ok_or(EncryptionFailure::MissingKey)?;
    if source.kind() != envelope.key_kind {
        return Err(EncryptionFailure::WrongKey.into());
    }

    let key = source.key_for_open(envelope.kdf.as_ref())?;

    match decrypt_checked(&envelope.key_check, &key)? {
        Some(check) if check == KEY_CHECK_PLAINTEXT => {}
        _ => return Err(EncryptionFailure::WrongKey.into()),
    }

    decrypt(&envelope.payload, &key)
}
