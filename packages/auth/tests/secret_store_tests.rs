// ABOUTME: Integration tests for the credential secret store
// ABOUTME: Covers encrypted file round trips, permissions, tampering and idempotent deletion

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use tempfile::TempDir;

use skybridge_auth::{AuthError, Credential, OAuthProvider, SecretStore};
use skybridge_security::CredentialEncryption;

fn test_credential(access_token: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: Some("1//refresh-token".to_string()),
        expiry: Utc::now() + Duration::hours(1),
        scope: ["openid".to_string(), "email".to_string()].into_iter().collect(),
        token_type: "Bearer".to_string(),
    }
}

fn file_store(dir: &TempDir, key: [u8; 32]) -> SecretStore {
    SecretStore::new(
        OAuthProvider::Google,
        dir.path(),
        None,
        Arc::new(CredentialEncryption::with_key(key)),
    )
}

fn record_path(dir: &TempDir, user_id: &str) -> std::path::PathBuf {
    dir.path().join("google").join(format!("{}.json", user_id))
}

#[tokio::test]
async fn test_store_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    let credential = test_credential("ya29.first");

    store.store("default", &credential).await.unwrap();

    assert_eq!(store.load("default").await.unwrap(), Some(credential));
}

#[tokio::test]
async fn test_load_without_record_is_none() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);

    assert_eq!(store.load("default").await.unwrap(), None);
}

#[tokio::test]
async fn test_store_replaces_previous_credential() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);

    store.store("default", &test_credential("ya29.old")).await.unwrap();
    store.store("default", &test_credential("ya29.new")).await.unwrap();

    let loaded = store.load("default").await.unwrap().unwrap();
    assert_eq!(loaded.access_token, "ya29.new");
    assert!(!record_path(&dir, "default").with_extension("json.tmp").exists());
}

#[tokio::test]
async fn test_record_file_never_contains_plaintext() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);

    store.store("default", &test_credential("ya29.secret-value")).await.unwrap();

    let raw = std::fs::read_to_string(record_path(&dir, "default")).unwrap();
    assert!(!raw.contains("ya29.secret-value"));
    assert!(!raw.contains("1//refresh-token"));

    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["kind"], "file_envelope");
    assert!(json["iv"].is_string());
    assert!(json["authTag"].is_string());
    assert!(json["ciphertext"].is_string());
}

#[cfg(unix)]
#[tokio::test]
async fn test_record_and_directory_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    store.store("default", &test_credential("ya29.x")).await.unwrap();

    let file_mode = std::fs::metadata(record_path(&dir, "default"))
        .unwrap()
        .permissions()
        .mode();
    let dir_mode = std::fs::metadata(dir.path().join("google"))
        .unwrap()
        .permissions()
        .mode();

    assert_eq!(file_mode & 0o777, 0o600);
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[tokio::test]
async fn test_tampered_ciphertext_is_corrupt_store() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    store.store("default", &test_credential("ya29.x")).await.unwrap();

    let path = record_path(&dir, "default");
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let mut ciphertext = STANDARD
        .decode(json["ciphertext"].as_str().unwrap())
        .unwrap();
    ciphertext[0] ^= 0xff;
    json["ciphertext"] = serde_json::Value::String(STANDARD.encode(ciphertext));
    std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let err = store.load("default").await.unwrap_err();
    assert!(matches!(err, AuthError::CorruptCredentialStore(_)));
    assert!(err.requires_reauthorization());
}

#[tokio::test]
async fn test_record_from_another_machine_is_corrupt_store() {
    let dir = TempDir::new().unwrap();
    file_store(&dir, [1u8; 32])
        .store("default", &test_credential("ya29.x"))
        .await
        .unwrap();

    let err = file_store(&dir, [2u8; 32]).load("default").await.unwrap_err();
    assert!(matches!(err, AuthError::CorruptCredentialStore(_)));
}

#[tokio::test]
async fn test_record_copied_between_users_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    store.store("alice", &test_credential("ya29.alice")).await.unwrap();

    std::fs::copy(record_path(&dir, "alice"), record_path(&dir, "bob")).unwrap();

    let err = store.load("bob").await.unwrap_err();
    assert!(matches!(err, AuthError::CorruptCredentialStore(_)));
}

#[tokio::test]
async fn test_unknown_record_kind_is_corrupt_store() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    std::fs::create_dir_all(dir.path().join("google")).unwrap();
    std::fs::write(
        record_path(&dir, "default"),
        r#"{"kind":"plaintext","accessToken":"leaked"}"#,
    )
    .unwrap();

    let err = store.load("default").await.unwrap_err();
    assert!(matches!(err, AuthError::CorruptCredentialStore(_)));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    store.store("default", &test_credential("ya29.x")).await.unwrap();

    store.delete("default").await.unwrap();
    store.delete("default").await.unwrap();

    assert_eq!(store.load("default").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_removes_unreadable_record() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);
    std::fs::create_dir_all(dir.path().join("google")).unwrap();
    std::fs::write(record_path(&dir, "default"), "not json").unwrap();

    store.delete("default").await.unwrap();

    assert!(!record_path(&dir, "default").exists());
}

#[tokio::test]
async fn test_users_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, [1u8; 32]);

    store.store("alice", &test_credential("ya29.alice")).await.unwrap();
    store.store("bob", &test_credential("ya29.bob")).await.unwrap();
    store.delete("alice").await.unwrap();

    assert_eq!(store.load("alice").await.unwrap(), None);
    assert_eq!(
        store.load("bob").await.unwrap().unwrap().access_token,
        "ya29.bob"
    );
}
