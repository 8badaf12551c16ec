//! Keyring integration tests: import, queries, default key and persistence.

mod common;

use std::sync::Arc;

use common::{generate_key, main_keyring, memory_registry, TEST_PASSWORD};
use mailkeys::storage::{public_keys_key, Storage};
use mailkeys::{
    ChangeType, Error, ImportRequest, ImportStatus, KeyKind, KeyringRegistry, MAIN_KEYRING_ID,
};

// =============================================================================
// Import
// =============================================================================

mod import {
    use super::*;

    #[tokio::test]
    async fn test_import_same_public_key_twice() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Bob <bob@example.com>");

        let first = keyring
            .import_keys(&[ImportRequest::public(key.public_key.clone())])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, ImportStatus::Success);
        assert_eq!(first[0].fingerprint.as_deref(), Some(key.fingerprint.as_str()));
        let count = keyring.get_keys().len();

        let second = keyring
            .import_keys(&[ImportRequest::public(key.public_key.clone())])
            .await
            .unwrap();
        assert_eq!(second[0].status, ImportStatus::Warning);
        assert!(second[0].message.contains("already exists"));
        assert_eq!(keyring.get_keys().len(), count);
    }

    #[tokio::test]
    async fn test_batch_reports_each_item() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Bob <bob@example.com>");

        let outcomes = keyring
            .import_keys(&[
                ImportRequest::public("garbage"),
                ImportRequest::public(key.public_key.clone()),
                ImportRequest::private(key.public_key.clone()),
            ])
            .await
            .unwrap();

        let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![ImportStatus::Error, ImportStatus::Success, ImportStatus::Error]
        );
        assert_eq!(keyring.get_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_store_add_then_load_keeps_identity() {
        let (registry, storage) = memory_registry().await;
        let key = generate_key("Carol <carol@example.com>");
        {
            let keyring = registry.get_keyring(MAIN_KEYRING_ID).await.unwrap();
            keyring
                .write()
                .await
                .import_keys(&[ImportRequest::public(key.public_key.clone())])
                .await
                .unwrap();
        }

        let stored = storage.get(&public_keys_key(MAIN_KEYRING_ID)).await.unwrap().unwrap();
        assert_eq!(stored.as_array().unwrap().len(), 1);

        let reopened = KeyringRegistry::new(storage);
        reopened.init().await.unwrap();
        let keyring = reopened.get_keyring(MAIN_KEYRING_ID).await.unwrap();
        let keyring = keyring.read().await;
        let entry = keyring
            .get_key_by_fingerprint(&key.fingerprint, Some(KeyKind::Public))
            .unwrap();
        assert_eq!(entry.user_ids[0].email.as_deref(), Some("carol@example.com"));
        assert_eq!(entry.user_ids[0].name, "Carol");
    }
}

// =============================================================================
// Queries
// =============================================================================

mod queries {
    use super::*;

    #[tokio::test]
    async fn test_get_key_by_address_is_case_insensitive() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Dave <Dave@Example.com>");
        keyring
            .import_keys(&[
                ImportRequest::public(key.public_key.clone()),
                ImportRequest::private(key.private_key.clone()),
            ])
            .await
            .unwrap();

        let found = keyring.get_key_by_address(&["DAVE@example.COM", "nobody@example.com"]);
        let keys = found["DAVE@example.COM"].as_ref().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].kind, KeyKind::Public);
        assert!(found["nobody@example.com"].is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_fingerprint_and_key_id() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Erin <erin@example.com>");
        keyring
            .import_keys(&[ImportRequest::private(key.private_key.clone())])
            .await
            .unwrap();

        let lower = key.fingerprint.to_lowercase();
        let entry = keyring.get_key_by_fingerprint(&lower, None).unwrap().clone();
        assert_eq!(entry.kind, KeyKind::Private);
        assert!(keyring.get_key_by_fingerprint(&lower, Some(KeyKind::Public)).is_none());

        assert_eq!(keyring.get_keys_by_key_id(&entry.key_id).len(), 1);
        assert_eq!(keyring.get_keys_by_key_id(&entry.subkey_ids[0]).len(), 1);

        assert!(keyring.has_private_key(&[]));
        assert!(keyring.has_private_key(&[key.fingerprint.as_str()]));
        assert!(!keyring.has_private_key(&["0000000000000000000000000000000000000000"]));
    }
}

// =============================================================================
// Default key
// =============================================================================

mod default_key {
    use super::*;

    #[tokio::test]
    async fn test_public_only_keyring_has_no_default() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Frank <frank@example.com>");
        keyring
            .import_keys(&[ImportRequest::public(key.public_key)])
            .await
            .unwrap();

        assert!(matches!(
            keyring.get_default_key().await,
            Err(Error::NoDefaultKey(_))
        ));
    }

    #[tokio::test]
    async fn test_first_private_key_becomes_default() {
        let (registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let first = generate_key("First <first@example.com>");
        let second = generate_key("Second <second@example.com>");
        keyring
            .import_keys(&[ImportRequest::private(first.private_key.clone())])
            .await
            .unwrap();
        keyring
            .import_keys(&[ImportRequest::private(second.private_key.clone())])
            .await
            .unwrap();

        let default = keyring.get_default_key().await.unwrap();
        assert_eq!(default.fingerprint, first.fingerprint);
        assert_eq!(default.kind, KeyKind::Private);

        let attributes = registry.get_all_keyring_attributes().await;
        assert_eq!(
            attributes[MAIN_KEYRING_ID].default_key_fingerprint.as_deref(),
            Some(first.fingerprint.as_str())
        );

        let data = keyring.get_key_data().await.unwrap();
        let flagged: Vec<_> = data.iter().filter(|d| d.is_default).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].fingerprint, first.fingerprint);
    }

    #[tokio::test]
    async fn test_removing_default_falls_back_then_fails() {
        let (registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let first = generate_key("First <first@example.com>");
        let second = generate_key("Second <second@example.com>");
        keyring
            .import_keys(&[
                ImportRequest::private(first.private_key.clone()),
                ImportRequest::private(second.private_key.clone()),
            ])
            .await
            .unwrap();

        keyring.set_default_key(&second.fingerprint).await.unwrap();
        assert_eq!(keyring.get_default_key_fpr().await.unwrap(), Some(second.fingerprint.clone()));

        keyring.remove_key(&second.fingerprint, KeyKind::Private).await.unwrap();
        let fallback = keyring.get_default_key().await.unwrap();
        assert_eq!(fallback.fingerprint, first.fingerprint);

        // The fallback is not persisted
        let attributes = registry.get_all_keyring_attributes().await;
        assert!(attributes[MAIN_KEYRING_ID].default_key_fingerprint.is_none());

        keyring.remove_key(&first.fingerprint, KeyKind::Private).await.unwrap();
        assert!(matches!(
            keyring.get_default_key().await,
            Err(Error::NoDefaultKey(_))
        ));
    }

    #[tokio::test]
    async fn test_set_default_requires_private_key() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Gina <gina@example.com>");
        keyring
            .import_keys(&[ImportRequest::public(key.public_key)])
            .await
            .unwrap();

        assert!(matches!(
            keyring.set_default_key(&key.fingerprint).await,
            Err(Error::KeyNotFound(_))
        ));
        assert!(matches!(
            keyring.remove_key(&key.fingerprint, KeyKind::Private).await,
            Err(Error::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_key_sets_default() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let params = mailkeys::GenerateKeyParams::new("Hank <hank@example.com>", TEST_PASSWORD);
        let key = keyring.generate_key(&params).await.unwrap();

        assert_eq!(keyring.get_default_key_fpr().await.unwrap(), Some(key.fingerprint));
        assert_eq!(keyring.get_private_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_key_server_is_reported() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let mut params = mailkeys::GenerateKeyParams::new("Ivy <ivy@example.com>", TEST_PASSWORD);
        params.upload_to_key_server = true;

        assert!(matches!(
            keyring.generate_key(&params).await,
            Err(Error::Unsupported(_))
        ));
        // The key was stored before the upload was attempted
        assert_eq!(keyring.get_private_keys().len(), 1);
    }
}

// =============================================================================
// Change log
// =============================================================================

mod change_log {
    use super::*;

    #[tokio::test]
    async fn test_mutations_are_logged_once_active() {
        let (_registry, keyring) = main_keyring().await;
        let mut keyring = keyring.write().await;
        let key = generate_key("Jay <jay@example.com>");

        keyring
            .import_keys(&[ImportRequest::public(key.public_key.clone())])
            .await
            .unwrap();
        assert!(keyring.sync().change_log().is_none());

        keyring.sync_mut().activate().await.unwrap();
        keyring
            .import_keys(&[ImportRequest::private(key.private_key.clone())])
            .await
            .unwrap();
        let entry = keyring.sync().change_log().unwrap().get(&key.fingerprint).unwrap().clone();
        assert_eq!(entry.change_type, ChangeType::Update);

        keyring.remove_key(&key.fingerprint, KeyKind::Private).await.unwrap();
        keyring.remove_key(&key.fingerprint, KeyKind::Public).await.unwrap();
        assert_eq!(keyring.sync().get_delete_entries(), vec![key.fingerprint.clone()]);
        assert!(keyring.sync().is_modified());
    }
}

// =============================================================================
// SQLite persistence
// =============================================================================

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use mailkeys::storage::SqliteStorage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_keyring_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let key = generate_key("Kim <kim@example.com>");

        {
            let registry = KeyringRegistry::new(Arc::new(SqliteStorage::open(&path).unwrap()));
            registry.init().await.unwrap();
            let keyring = registry.create_keyring("mail.example.com|#|web").await.unwrap();
            keyring
                .write()
                .await
                .import_keys(&[ImportRequest::private(key.private_key.clone())])
                .await
                .unwrap();
        }

        let registry = KeyringRegistry::new(Arc::new(SqliteStorage::open(&path).unwrap()));
        registry.init().await.unwrap();
        let mut ids = registry.keyring_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["localhost|#|mailvelope", "mail.example.com|#|web"]);

        let found = registry
            .get_keyring_with_private_key(&[key.fingerprint.as_str()], None)
            .await
            .unwrap()
            .unwrap();
        let found = found.read().await;
        assert_eq!(found.id(), "mail.example.com|#|web");
        assert_eq!(found.get_default_key().await.unwrap().fingerprint, key.fingerprint);
    }
}
