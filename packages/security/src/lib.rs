// ABOUTME: Encryption primitives for Skybridge credential storage
// ABOUTME: Provides the machine-derived key and the AES-256-GCM credential envelope

pub mod encryption;

// Re-export main types for convenience
pub use encryption::{CredentialEncryption, EncryptedEnvelope, EncryptionError};
