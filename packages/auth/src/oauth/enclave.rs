// ABOUTME: Secure-enclave backend abstraction over the OS keychain
// ABOUTME: Keychain items are addressed by service + account; calls are blocking

use keyring::Entry;
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Platform secret storage addressed by service and account
#[cfg_attr(test, mockall::automock)]
pub trait SecureEnclave: Send + Sync {
    fn set(&self, service: &str, account: &str, secret: &str) -> AuthResult<()>;

    /// Returns `Ok(None)` when no item exists
    fn get(&self, service: &str, account: &str) -> AuthResult<Option<String>>;

    /// Removing a missing item is not an error
    fn delete(&self, service: &str, account: &str) -> AuthResult<()>;
}

/// OS keychain via the `keyring` crate
/// - macOS: Keychain Services
/// - Windows: Credential Manager
/// - Linux: kernel keyutils
#[derive(Debug, Default)]
pub struct KeyringEnclave;

impl KeyringEnclave {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> AuthResult<Entry> {
        Entry::new(service, account)
            .map_err(|e| AuthError::Keychain(format!("Failed to access keychain entry: {}", e)))
    }
}

impl SecureEnclave for KeyringEnclave {
    fn set(&self, service: &str, account: &str, secret: &str) -> AuthResult<()> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(|e| AuthError::Keychain(format!("Failed to store keychain item: {}", e)))?;
        debug!("Stored keychain item {}/{}", service, account);
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> AuthResult<Option<String>> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Keychain(format!(
                "Failed to read keychain item: {}",
                e
            ))),
        }
    }

    fn delete(&self, service: &str, account: &str) -> AuthResult<()> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Keychain(format!(
                "Failed to delete keychain item: {}",
                e
            ))),
        }
    }
}
