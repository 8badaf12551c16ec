//! The GnuPG keyring against a scripted agent.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{generate_key, TEST_PASSWORD};
use mailkeys::gnupg::{
    AgentDecryptResult, AgentEncryptRequest, AgentImportResult, AgentImportedKey, AgentKey,
    AgentSignature, AgentSignatures, ArmoredKeys, GpgAgent, ImportSummary,
};
use mailkeys::keystore::{Backend, GpgKeyStore, KeyStore};
use mailkeys::storage::MemoryStorage;
use mailkeys::{
    decrypt_message, encrypt_message, sign_message, Error, GenerateKeyParams, GeneratedKey,
    ImportRequest, ImportStatus, KeyKind, KeyringHandle, KeyringRegistry, PassphraseUnlock,
    PasswordCache, Recipient, Result, GNUPG_KEYRING_ID, MAIN_KEYRING_ID,
};

#[derive(Default)]
struct ScriptedAgent {
    exported: Mutex<ArmoredKeys>,
    default_key: Mutex<Option<String>>,
    import_result: Mutex<AgentImportResult>,
    encrypt_requests: Mutex<Vec<AgentEncryptRequest>>,
    decrypt_result: Mutex<AgentDecryptResult>,
}

#[async_trait]
impl GpgAgent for ScriptedAgent {
    async fn get_keys_armored(&self) -> Result<ArmoredKeys> {
        Ok(self.exported.lock().unwrap().clone())
    }

    async fn get_default_key(&self) -> Result<Option<String>> {
        Ok(self.default_key.lock().unwrap().clone())
    }

    async fn import_keys(&self, armored: &str) -> Result<AgentImportResult> {
        let result = self.import_result.lock().unwrap().clone();
        if !result.is_aborted() {
            self.exported.lock().unwrap().armored = armored.to_string();
        }
        Ok(result)
    }

    async fn encrypt(&self, request: AgentEncryptRequest) -> Result<String> {
        self.encrypt_requests.lock().unwrap().push(request);
        Ok("-----BEGIN PGP MESSAGE-----\nagent\n-----END PGP MESSAGE-----\n".to_string())
    }

    async fn decrypt(&self, _armored: &str) -> Result<AgentDecryptResult> {
        Ok(self.decrypt_result.lock().unwrap().clone())
    }
}

/// Agent holding the secret key of `key`, which is also its default.
fn agent_with_secret(key: &GeneratedKey) -> Arc<ScriptedAgent> {
    let agent = ScriptedAgent::default();
    *agent.exported.lock().unwrap() = ArmoredKeys {
        armored: key.public_key.clone(),
        secret_fingerprints: vec![key.fingerprint.to_lowercase()],
    };
    *agent.default_key.lock().unwrap() = Some(key.fingerprint.clone());
    Arc::new(agent)
}

async fn gnupg_keyring(agent: Arc<ScriptedAgent>) -> (KeyringRegistry, KeyringHandle) {
    let registry = KeyringRegistry::new(Arc::new(MemoryStorage::new())).with_agent(agent);
    registry.init().await.unwrap();
    let keyring = registry.get_keyring(GNUPG_KEYRING_ID).await.unwrap();
    (registry, keyring)
}

fn unlock() -> PassphraseUnlock {
    PassphraseUnlock::new(Arc::new(PasswordCache::new(Default::default())), TEST_PASSWORD)
}

#[tokio::test]
async fn test_agent_keys_are_loaded() {
    let key = generate_key("Gpg <gpg@example.com>");
    let (registry, keyring) = gnupg_keyring(agent_with_secret(&key)).await;

    let ids = registry.keyring_ids().await;
    assert!(ids.contains(&GNUPG_KEYRING_ID.to_string()));
    assert!(ids.contains(&MAIN_KEYRING_ID.to_string()));

    let keyring = keyring.read().await;
    assert_eq!(keyring.backend(), Backend::GnuPg);
    assert!(keyring
        .get_key_by_fingerprint(&key.fingerprint, Some(KeyKind::Public))
        .is_some());
    assert!(keyring
        .get_key_by_fingerprint(&key.fingerprint, Some(KeyKind::Private))
        .is_some());
    assert_eq!(
        keyring.get_default_key_fpr().await.unwrap().as_deref(),
        Some(key.fingerprint.as_str())
    );
}

#[tokio::test]
async fn test_import_through_agent() {
    let agent = Arc::new(ScriptedAgent::default());
    let (_registry, keyring) = gnupg_keyring(agent.clone()).await;
    let key = generate_key("New <new@example.com>");

    *agent.import_result.lock().unwrap() = AgentImportResult {
        keys: vec![AgentImportedKey {
            key: AgentKey {
                fingerprint: key.fingerprint.clone(),
            },
            status: "newkey".to_string(),
        }],
        summary: ImportSummary {
            considered: 1,
            imported: 1,
            unchanged: 0,
        },
    };

    let mut keyring = keyring.write().await;
    let outcomes = keyring
        .import_keys(&[ImportRequest::public(key.public_key.clone())])
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, ImportStatus::Success);
    assert!(keyring.get_key_by_fingerprint(&key.fingerprint, None).is_some());
}

#[tokio::test]
async fn test_aborted_import_fails_the_call() {
    let agent = Arc::new(ScriptedAgent::default());
    let (_registry, keyring) = gnupg_keyring(agent).await;

    let result = keyring
        .write()
        .await
        .import_keys(&[ImportRequest::public("not a key")])
        .await;
    assert!(matches!(result, Err(Error::AgentAborted)));
}

#[tokio::test]
async fn test_encrypt_is_delegated() {
    let key = generate_key("Gpg <gpg@example.com>");
    let agent = agent_with_secret(&key);
    let (_registry, keyring) = gnupg_keyring(agent.clone()).await;
    let keyring = keyring.read().await;

    let recipients = [Recipient::Email("gpg@example.com".to_string())];
    let unlock = unlock();
    let armored = encrypt_message(&keyring, "hello", &recipients, Some(&unlock), None)
        .await
        .unwrap();
    assert!(armored.contains("agent"));

    let requests = agent.encrypt_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].data, "hello");
    assert_eq!(requests[0].keys, vec![key.fingerprint.clone()]);
    assert_eq!(requests[0].signing_keys, vec![key.fingerprint.clone()]);

    drop(requests);
    let unknown = [Recipient::Email("nobody@example.com".to_string())];
    assert!(matches!(
        encrypt_message(&keyring, "hello", &unknown, None, None).await,
        Err(Error::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_decrypt_maps_agent_signatures() {
    let key = generate_key("Gpg <gpg@example.com>");
    let agent = agent_with_secret(&key);
    *agent.decrypt_result.lock().unwrap() = AgentDecryptResult {
        data: "plain".to_string(),
        signatures: AgentSignatures {
            good: vec![AgentSignature {
                fingerprint: key.fingerprint.to_lowercase(),
                timestamp: 0,
                validity: Some("full".to_string()),
                error: None,
            }],
            bad: vec![AgentSignature {
                fingerprint: "00".repeat(20),
                timestamp: 0,
                validity: None,
                error: Some("bad signature".to_string()),
            }],
        },
    };
    let (_registry, keyring) = gnupg_keyring(agent).await;
    let keyring = keyring.read().await;

    let decrypted = decrypt_message(&keyring, "ignored", &unlock()).await.unwrap();
    assert_eq!(decrypted.text(), "plain");
    assert_eq!(decrypted.signatures.len(), 2);
    assert!(decrypted.signatures[0].valid);
    assert_eq!(
        decrypted.signatures[0].fingerprint.as_deref(),
        Some(key.fingerprint.as_str())
    );
    assert!(!decrypted.signatures[1].valid);
}

#[tokio::test]
async fn test_local_only_operations_are_unsupported() {
    let key = generate_key("Gpg <gpg@example.com>");
    let (registry, keyring) = gnupg_keyring(agent_with_secret(&key)).await;
    let mut keyring = keyring.write().await;

    assert!(matches!(
        keyring
            .generate_key(&GenerateKeyParams::new("X <x@example.com>", TEST_PASSWORD))
            .await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        keyring.set_default_key(&key.fingerprint).await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        keyring.remove_key(&key.fingerprint, KeyKind::Public).await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        sign_message(&keyring, "text", &unlock()).await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        registry.delete_keyring(GNUPG_KEYRING_ID).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_agent_store_cannot_be_overwritten() {
    let key = generate_key("Gpg <gpg@example.com>");
    let mut store = GpgKeyStore::new(agent_with_secret(&key));
    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.len(), 2);

    assert!(matches!(store.store(Vec::new()).await, Err(Error::Unsupported(_))));
    assert_eq!(store.keys().len(), 2);
}
