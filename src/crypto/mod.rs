//! Cryptographic functions for Keepsafe
//!
//! Provides AES-256-GCM encryption with Argon2id key derivation (or a device
//! keystore secret) for optional encryption of backup payloads.

pub mod encryption;
pub mod key_derivation;
pub mod secure_memory;

pub use encryption::{decrypt, encrypt, open, seal, EncryptedData, SealedEnvelope};
pub use key_derivation::{derive_key, DerivedKey, KeyDerivationParams, KeyKind, KeySource};
pub use secure_memory::{DeviceSecret, SecureString};
