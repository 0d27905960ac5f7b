// ABOUTME: Credential envelope encryption using AES-256-GCM
// ABOUTME: Key is derived once per process from machine and user identifiers via PBKDF2
//
// SECURITY MODEL:
//
// Machine-Based Encryption:
// - Derives the encryption key from machine ID + username + hostname + application salt
// - The inputs are not secret; this protects credential files that are copied off
//   the machine (backups, sync folders), not against a local attacker running as the user
// - PBKDF2-HMAC-SHA256 with 100,000 iterations, computed once and cached for the process
// - Every envelope carries its own random 96-bit IV and a 128-bit GCM tag, so tampering
//   with any field is detected on decrypt
// - Callers bind each envelope to its record key through associated data, so an envelope
//   moved to another record does not decrypt

use std::num::NonZeroU32;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use once_cell::sync::OnceCell;
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey},
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Application salt for key derivation (constant, not secret)
const APP_SALT: &[u8] = b"skybridge-credential-encryption-v1";

/// PBKDF2 iteration count for the machine key
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Key size for AES-256-GCM
pub const KEY_SIZE: usize = 32;

/// IV size for AES-256-GCM
pub const IV_SIZE: usize = 12;

/// Authentication tag size for AES-256-GCM
pub const TAG_SIZE: usize = 16;

static MACHINE_KEY: OnceCell<[u8; KEY_SIZE]> = OnceCell::new();

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Failed to generate random data: {0}")]
    RandomGeneration(String),

    #[error("Failed to encrypt data: {0}")]
    Encryption(String),

    #[error("Failed to decrypt data: {0}")]
    Decryption(String),

    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),
}

/// Self-describing encrypted payload, all fields base64-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub iv: String,
    pub auth_tag: String,
    pub ciphertext: String,
}

/// AES-256-GCM encryption service
pub struct CredentialEncryption {
    rng: SystemRandom,
    encryption_key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for CredentialEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEncryption").finish_non_exhaustive()
    }
}

impl CredentialEncryption {
    /// Create an encryption service keyed by the machine-derived key.
    ///
    /// The first call runs the key derivation; later calls reuse the cached key.
    pub fn with_machine_key() -> Result<Self, EncryptionError> {
        let key = MACHINE_KEY.get_or_try_init(|| {
            debug!("Deriving machine credential key");
            derive_key(&machine_key_material())
        })?;
        Ok(Self::with_key(*key))
    }

    /// Create an encryption service from raw key bytes
    pub fn with_key(encryption_key: [u8; KEY_SIZE]) -> Self {
        Self {
            rng: SystemRandom::new(),
            encryption_key,
        }
    }

    fn key(&self) -> Result<LessSafeKey, EncryptionError> {
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.encryption_key)
            .map_err(|_| EncryptionError::KeyDerivation("Invalid AES-256 key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `plaintext`, binding it to `context` as associated data
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        context: &str,
    ) -> Result<EncryptedEnvelope, EncryptionError> {
        let mut iv = [0u8; IV_SIZE];
        self.rng
            .fill(&mut iv)
            .map_err(|_| EncryptionError::RandomGeneration("Failed to generate IV".to_string()))?;

        let nonce = Nonce::assume_unique_for_key(iv);
        let mut in_out = plaintext.to_vec();
        let tag = self
            .key()?
            .seal_in_place_separate_tag(nonce, Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| EncryptionError::Encryption("Seal operation failed".to_string()))?;

        Ok(EncryptedEnvelope {
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(tag.as_ref()),
            ciphertext: BASE64.encode(&in_out),
        })
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt) with the same context
    pub fn decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        context: &str,
    ) -> Result<Vec<u8>, EncryptionError> {
        let iv = decode_field("iv", &envelope.iv)?;
        let tag = decode_field("authTag", &envelope.auth_tag)?;
        let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;

        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|v: Vec<u8>| {
            EncryptionError::InvalidFormat(format!("IV must be {} bytes, got {}", IV_SIZE, v.len()))
        })?;
        if tag.len() != TAG_SIZE {
            return Err(EncryptionError::InvalidFormat(format!(
                "Auth tag must be {} bytes, got {}",
                TAG_SIZE,
                tag.len()
            )));
        }

        let mut in_out = ciphertext;
        in_out.extend_from_slice(&tag);

        let plaintext = self
            .key()?
            .open_in_place(
                Nonce::assume_unique_for_key(iv),
                Aad::from(context.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| {
                EncryptionError::Decryption("Authentication failed (wrong key or tampered data)".to_string())
            })?;

        Ok(plaintext.to_vec())
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, EncryptionError> {
    BASE64
        .decode(value)
        .map_err(|e| EncryptionError::InvalidFormat(format!("{} is not valid base64: {}", name, e)))
}

/// Run PBKDF2-HMAC-SHA256 over `material` with the application salt
pub fn derive_key(material: &[u8]) -> Result<[u8; KEY_SIZE], EncryptionError> {
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
        .ok_or_else(|| EncryptionError::KeyDerivation("Iteration count must be non-zero".to_string()))?;

    let mut key = [0u8; KEY_SIZE];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        APP_SALT,
        material,
        &mut key,
    );
    Ok(key)
}

/// Non-secret machine and user identifiers fed into the key derivation
fn machine_key_material() -> Vec<u8> {
    // Containers and some VMs have no machine ID; username and hostname still
    // distinguish the key from a bare application salt.
    let machine_id = machine_uid::get().unwrap_or_else(|e| {
        warn!("Machine ID unavailable, continuing without it: {}", e);
        "unknown-machine".to_string()
    });

    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|e| {
            warn!("Hostname unavailable, continuing without it: {}", e);
            "unknown-host".to_string()
        });

    let mut material = Vec::with_capacity(machine_id.len() + username.len() + hostname.len() + 2);
    material.extend_from_slice(machine_id.as_bytes());
    material.push(0);
    material.extend_from_slice(username.as_bytes());
    material.push(0);
    material.extend_from_slice(hostname.as_bytes());
    material
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_encryption() -> CredentialEncryption {
        CredentialEncryption::with_key([7u8; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let encryption = test_encryption();
        let plaintext = br#"{"accessToken":"ya29.test","refreshToken":"1//refresh"}"#;

        let envelope = encryption.encrypt(plaintext, "google:default").unwrap();
        assert_ne!(envelope.ciphertext.as_bytes(), plaintext.as_slice());

        let decrypted = encryption.decrypt(&envelope, "google:default").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_ivs() {
        let encryption = test_encryption();
        let first = encryption.encrypt(b"same-plaintext", "ctx").unwrap();
        let second = encryption.encrypt(b"same-plaintext", "ctx").unwrap();

        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let encryption = test_encryption();
        let mut envelope = encryption.encrypt(b"secret-token", "ctx").unwrap();

        let mut bytes = BASE64.decode(&envelope.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        envelope.ciphertext = BASE64.encode(bytes);

        assert!(matches!(
            encryption.decrypt(&envelope, "ctx"),
            Err(EncryptionError::Decryption(_))
        ));
    }

    #[test]
    fn test_tampered_auth_tag_fails() {
        let encryption = test_encryption();
        let mut envelope = encryption.encrypt(b"secret-token", "ctx").unwrap();

        let mut tag = BASE64.decode(&envelope.auth_tag).unwrap();
        tag[TAG_SIZE - 1] ^= 0xff;
        envelope.auth_tag = BASE64.encode(tag);

        assert!(encryption.decrypt(&envelope, "ctx").is_err());
    }

    #[test]
    fn test_wrong_context_fails() {
        let encryption = test_encryption();
        let envelope = encryption.encrypt(b"secret-token", "google:alice").unwrap();

        assert!(encryption.decrypt(&envelope, "google:bob").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = test_encryption().encrypt(b"secret", "ctx").unwrap();
        let other = CredentialEncryption::with_key([9u8; KEY_SIZE]);

        assert!(other.decrypt(&envelope, "ctx").is_err());
    }

    #[test]
    fn test_malformed_envelope_fails() {
        let encryption = test_encryption();
        let valid = encryption.encrypt(b"secret", "ctx").unwrap();

        let bad_base64 = EncryptedEnvelope {
            iv: "not-valid-base64!@#".to_string(),
            ..valid.clone()
        };
        assert!(matches!(
            encryption.decrypt(&bad_base64, "ctx"),
            Err(EncryptionError::InvalidFormat(_))
        ));

        let short_tag = EncryptedEnvelope {
            auth_tag: BASE64.encode([0u8; 4]),
            ..valid
        };
        assert!(matches!(
            encryption.decrypt(&short_tag, "ctx"),
            Err(EncryptionError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_envelope_serializes_camel_case() {
        let envelope = test_encryption().encrypt(b"x", "ctx").unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert!(json.get("iv").is_some());
        assert!(json.get("authTag").is_some());
        assert!(json.get("ciphertext").is_some());
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let first = derive_key(b"machine\0user\0host").unwrap();
        let second = derive_key(b"machine\0user\0host").unwrap();
        let other = derive_key(b"machine\0other\0host").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_machine_key_cached_and_usable() {
        let first = CredentialEncryption::with_machine_key().unwrap();
        let second = CredentialEncryption::with_machine_key().unwrap();
        assert_eq!(first.encryption_key, second.encryption_key);

        let envelope = first.encrypt(b"portable?", "ctx").unwrap();
        assert_eq!(second.decrypt(&envelope, "ctx").unwrap(), b"portable?");
    }
}
