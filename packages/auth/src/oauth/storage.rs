// ABOUTME: Durable, confidential storage of one OAuth credential per provider and user
// ABOUTME: Keychain reference when the OS keychain works, encrypted file envelope otherwise

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use skybridge_config::RuntimeSettings;
use skybridge_security::{CredentialEncryption, EncryptedEnvelope};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{
    error::{AuthError, AuthResult},
    oauth::{
        enclave::{KeyringEnclave, SecureEnclave},
        provider::OAuthProvider,
        types::Credential,
    },
};

/// At-rest representation of a stored credential.
///
/// The `kind` tag decides how the record is read back; the reader never guesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredCredentialRecord {
    Keychain { service: String, account: String },
    FileEnvelope(EncryptedEnvelope),
}

/// Credential storage for a single provider. Clones share the enclave and key.
#[derive(Clone)]
pub struct SecretStore {
    provider: OAuthProvider,
    dir: PathBuf,
    enclave: Option<Arc<dyn SecureEnclave>>,
    encryption: Arc<CredentialEncryption>,
}

impl SecretStore {
    /// Create a store rooted at `credentials_root/<provider>`
    pub fn new(
        provider: OAuthProvider,
        credentials_root: impl AsRef<Path>,
        enclave: Option<Arc<dyn SecureEnclave>>,
        encryption: Arc<CredentialEncryption>,
    ) -> Self {
        Self {
            provider,
            dir: credentials_root.as_ref().join(provider.to_string()),
            enclave,
            encryption,
        }
    }

    /// Create a store from runtime settings with the OS keychain and machine key
    pub fn from_settings(provider: OAuthProvider, settings: &RuntimeSettings) -> AuthResult<Self> {
        let encryption = CredentialEncryption::with_machine_key()
            .map_err(|e| AuthError::Storage(format!("Failed to initialize encryption: {}", e)))?;
        let enclave: Option<Arc<dyn SecureEnclave>> = if settings.keychain_enabled {
            Some(Arc::new(KeyringEnclave::new()))
        } else {
            None
        };

        Ok(Self::new(
            provider,
            settings.credentials_dir(),
            enclave,
            Arc::new(encryption),
        ))
    }

    pub fn provider(&self) -> OAuthProvider {
        self.provider
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn service(&self) -> String {
        format!("skybridge-{}", self.provider)
    }

    fn record_context(&self, user_id: &str) -> String {
        format!("skybridge:{}:{}", self.provider, user_id)
    }

    fn record_path(&self, user_id: &str) -> AuthResult<PathBuf> {
        let valid = !user_id.is_empty()
            && !user_id.starts_with('.')
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(AuthError::Storage(format!("Invalid user id: {:?}", user_id)));
        }
        Ok(self.dir.join(format!("{}.json", user_id)))
    }

    /// Persist the credential, replacing any previous record for `user_id`
    pub async fn store(&self, user_id: &str, credential: &Credential) -> AuthResult<()> {
        let path = self.record_path(user_id)?;
        let serialized = serde_json::to_string(credential)?;

        let record = match self.store_in_enclave(user_id, &serialized).await {
            Some(record) => record,
            None => {
                let envelope = self
                    .encryption
                    .encrypt(serialized.as_bytes(), &self.record_context(user_id))
                    .map_err(|e| AuthError::Storage(format!("Credential encryption failed: {}", e)))?;
                StoredCredentialRecord::FileEnvelope(envelope)
            }
        };

        self.ensure_dir().await?;
        write_owner_only(&path, serde_json::to_vec_pretty(&record)?.as_slice()).await?;

        debug!(
            "Stored {} credential for user {} ({})",
            self.provider,
            user_id,
            match record {
                StoredCredentialRecord::Keychain { .. } => "keychain",
                StoredCredentialRecord::FileEnvelope(_) => "file envelope",
            }
        );
        Ok(())
    }

    async fn store_in_enclave(&self, user_id: &str, serialized: &str) -> Option<StoredCredentialRecord> {
        let enclave = self.enclave.clone()?;
        let service = self.service();
        let account = user_id.to_string();
        let secret = serialized.to_string();

        let (svc, acct) = (service.clone(), account.clone());
        let result = tokio::task::spawn_blocking(move || enclave.set(&svc, &acct, &secret)).await;

        match result {
            Ok(Ok(())) => Some(StoredCredentialRecord::Keychain { service, account }),
            Ok(Err(e)) => {
                warn!("Keychain unavailable, falling back to encrypted file: {}", e);
                None
            }
            Err(e) => {
                warn!("Keychain task failed, falling back to encrypted file: {}", e);
                None
            }
        }
    }

    /// Load the credential for `user_id`; `Ok(None)` means "not yet authorized"
    pub async fn load(&self, user_id: &str) -> AuthResult<Option<Credential>> {
        let Some(record) = self.read_record(user_id).await? else {
            debug!("No stored {} credential for user {}", self.provider, user_id);
            return Ok(None);
        };

        let serialized = match record {
            StoredCredentialRecord::Keychain { service, account } => {
                self.load_from_enclave(service, account).await?
            }
            StoredCredentialRecord::FileEnvelope(envelope) => {
                let plaintext = self
                    .encryption
                    .decrypt(&envelope, &self.record_context(user_id))
                    .map_err(|e| AuthError::CorruptCredentialStore(e.to_string()))?;
                String::from_utf8(plaintext).map_err(|_| {
                    AuthError::CorruptCredentialStore("Decrypted credential is not UTF-8".to_string())
                })?
            }
        };

        let credential = serde_json::from_str(&serialized).map_err(|e| {
            AuthError::CorruptCredentialStore(format!("Stored credential is unreadable: {}", e))
        })?;
        Ok(Some(credential))
    }

    async fn load_from_enclave(&self, service: String, account: String) -> AuthResult<String> {
        let enclave = self.enclave.clone().ok_or_else(|| {
            AuthError::CorruptCredentialStore(
                "Record references the keychain but the keychain is disabled".to_string(),
            )
        })?;

        let lookup = tokio::task::spawn_blocking(move || enclave.get(&service, &account))
            .await
            .map_err(|e| AuthError::Keychain(format!("Keychain task failed: {}", e)))?;

        match lookup {
            Ok(Some(secret)) => Ok(secret),
            Ok(None) => Err(AuthError::CorruptCredentialStore(
                "Keychain item referenced by the record is missing".to_string(),
            )),
            Err(e) => Err(AuthError::CorruptCredentialStore(e.to_string())),
        }
    }

    async fn read_record(&self, user_id: &str) -> AuthResult<Option<StoredCredentialRecord>> {
        let path = self.record_path(user_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            AuthError::CorruptCredentialStore(format!("Unrecognized credential record: {}", e))
        })
    }

    /// Remove the credential for `user_id`; deleting a missing record succeeds
    pub async fn delete(&self, user_id: &str) -> AuthResult<()> {
        let path = self.record_path(user_id)?;

        // An unreadable record is still removed
        if let Ok(Some(StoredCredentialRecord::Keychain { service, account })) =
            self.read_record(user_id).await
        {
            if let Some(enclave) = self.enclave.clone() {
                let result = tokio::task::spawn_blocking(move || enclave.delete(&service, &account)).await;
                if !matches!(result, Ok(Ok(()))) {
                    warn!("Failed to remove keychain item for {}/{}", self.provider, user_id);
                }
            }
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {} credential for user {}", self.provider, user_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_dir(&self) -> AuthResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

/// Write `bytes` to `path` through a temp file so readers never see a partial record
async fn write_owner_only(path: &Path, bytes: &[u8]) -> AuthResult<()> {
    let tmp_path = path.with_extension("json.tmp");

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::enclave::MockSecureEnclave;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn test_credential() -> Credential {
        Credential {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expiry: Utc::now() + Duration::hours(1),
            scope: ["openid".to_string()].into_iter().collect(),
            token_type: "Bearer".to_string(),
        }
    }

    fn store_with(dir: &TempDir, enclave: Option<Arc<dyn SecureEnclave>>) -> SecretStore {
        SecretStore::new(
            OAuthProvider::Google,
            dir.path(),
            enclave,
            Arc::new(CredentialEncryption::with_key([3u8; 32])),
        )
    }

    #[tokio::test]
    async fn test_keychain_failure_falls_back_to_file_envelope() {
        let dir = TempDir::new().unwrap();
        let mut enclave = MockSecureEnclave::new();
        enclave
            .expect_set()
            .times(1)
            .returning(|_, _, _| Err(AuthError::Keychain("no secret service".to_string())));
        enclave.expect_get().never();

        let store = store_with(&dir, Some(Arc::new(enclave)));
        let credential = test_credential();
        store.store("default", &credential).await.unwrap();

        let record = store.read_record("default").await.unwrap().unwrap();
        assert!(matches!(record, StoredCredentialRecord::FileEnvelope(_)));
        assert_eq!(store.load("default").await.unwrap(), Some(credential));
    }

    #[tokio::test]
    async fn test_keychain_success_stores_reference_only() {
        let dir = TempDir::new().unwrap();
        let mut enclave = MockSecureEnclave::new();
        enclave
            .expect_set()
            .withf(|service, account, _| service == "skybridge-google" && account == "default")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let store = store_with(&dir, Some(Arc::new(enclave)));
        store.store("default", &test_credential()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("google/default.json")).unwrap();
        assert!(!raw.contains("ya29.access"));
        assert_eq!(
            store.read_record("default").await.unwrap(),
            Some(StoredCredentialRecord::Keychain {
                service: "skybridge-google".to_string(),
                account: "default".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_keychain_item_is_corrupt_store() {
        let dir = TempDir::new().unwrap();
        let mut enclave = MockSecureEnclave::new();
        enclave.expect_set().returning(|_, _, _| Ok(()));
        enclave.expect_get().returning(|_, _| Ok(None));

        let store = store_with(&dir, Some(Arc::new(enclave)));
        store.store("default", &test_credential()).await.unwrap();

        let err = store.load("default").await.unwrap_err();
        assert!(matches!(err, AuthError::CorruptCredentialStore(_)));
    }

    #[tokio::test]
    async fn test_rejects_path_like_user_ids() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, None);

        for user_id in ["", "../escape", ".hidden", "a/b"] {
            assert!(matches!(
                store.load(user_id).await,
                Err(AuthError::Storage(_))
            ));
        }
    }
}
