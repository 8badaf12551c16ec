//! Synchronization of keyring replicas.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{generate_key, main_keyring, TEST_PASSWORD};
use mailkeys::config::PasswordCacheConfig;
use mailkeys::sync::{SyncPayload, SyncTransport};
use mailkeys::{
    ChangeLog, ChangeLogEntry, ChangeType, Error, ImportRequest, KeyKind, PassphraseUnlock,
    PasswordCache, SyncController,
};

/// Transport holding the latest message in memory, shared by all replicas.
#[derive(Clone, Default)]
struct MemoryTransport {
    latest: Arc<Mutex<Option<SyncPayload>>>,
    counter: Arc<AtomicU64>,
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn download(&self, etag: Option<&str>) -> mailkeys::Result<Option<SyncPayload>> {
        let latest = self.latest.lock().unwrap().clone();
        Ok(latest.filter(|p| Some(p.etag.as_str()) != etag))
    }

    async fn upload(&self, message: &str, _etag: Option<&str>) -> mailkeys::Result<String> {
        let etag = (self.counter.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        *self.latest.lock().unwrap() = Some(SyncPayload {
            etag: etag.clone(),
            message: message.to_string(),
        });
        Ok(etag)
    }
}

fn entry(fpr: &str, change_type: ChangeType, time: i64) -> ChangeLogEntry {
    ChangeLogEntry {
        fingerprint: fpr.to_string(),
        change_type,
        time,
    }
}

fn unlock() -> PassphraseUnlock {
    let cache = Arc::new(PasswordCache::new(PasswordCacheConfig::default()));
    PassphraseUnlock::new(cache, TEST_PASSWORD)
}

#[test]
fn test_replicas_converge_regardless_of_merge_order() {
    // Both replicas knew F and later delete it and insert G
    let replica_a: ChangeLog = [entry("F", ChangeType::Delete, 200), entry("G", ChangeType::Insert, 210)]
        .into_iter()
        .collect();
    let replica_b: ChangeLog = [entry("F", ChangeType::Delete, 205), entry("G", ChangeType::Insert, 190)]
        .into_iter()
        .collect();

    let mut merged_a = replica_a.clone();
    merged_a.merge(&replica_b);
    let mut merged_b = replica_b.clone();
    merged_b.merge(&replica_a);

    assert_eq!(merged_a, merged_b);
    assert_eq!(merged_a.get("F").unwrap().change_type, ChangeType::Delete);
    assert_eq!(merged_a.get("G").unwrap().change_type, ChangeType::Insert);

    // Idempotent
    let mut again = merged_a.clone();
    assert!(!again.merge(&replica_b));
    assert_eq!(again, merged_a);
}

#[tokio::test]
async fn test_sync_requires_activation() {
    let (_registry, keyring) = main_keyring().await;
    let mut keyring = keyring.write().await;
    let owner = generate_key("Owner <owner@example.com>");
    keyring
        .import_keys(&[ImportRequest::private(owner.private_key)])
        .await
        .unwrap();

    let controller = SyncController::new(MemoryTransport::default());
    assert!(matches!(
        controller.sync(&mut keyring, &unlock()).await,
        Err(Error::Sync(_))
    ));
}

#[tokio::test]
async fn test_two_replicas_exchange_changes() {
    let owner = generate_key("Owner <owner@example.com>");
    let shared = generate_key("Frank <frank@example.com>");
    let added = generate_key("Grace <grace@example.com>");
    let transport = MemoryTransport::default();
    let controller = SyncController::new(transport.clone());
    let unlock = unlock();

    let (_registry_a, replica_a) = main_keyring().await;
    let (_registry_b, replica_b) = main_keyring().await;
    for replica in [&replica_a, &replica_b] {
        let mut keyring = replica.write().await;
        keyring
            .import_keys(&[
                ImportRequest::private(owner.private_key.clone()),
                ImportRequest::public(shared.public_key.clone()),
            ])
            .await
            .unwrap();
        keyring.sync_mut().activate().await.unwrap();
    }

    // Replica A adds G and publishes first
    {
        let mut a = replica_a.write().await;
        a.import_keys(&[ImportRequest::public(added.public_key.clone())])
            .await
            .unwrap();
        let report = controller.sync(&mut a, &unlock).await.unwrap();
        assert!(report.uploaded);
        assert!(!report.downloaded);
    }

    // Replica B deletes F, takes G from A and publishes the merge
    {
        let mut b = replica_b.write().await;
        b.remove_key(&shared.fingerprint, KeyKind::Public).await.unwrap();
        let report = controller.sync(&mut b, &unlock).await.unwrap();
        assert!(report.downloaded);
        assert!(report.uploaded);
        assert_eq!(report.imported, vec![added.fingerprint.clone()]);
        assert!(b.get_key_by_fingerprint(&shared.fingerprint, None).is_none());
    }

    // Replica A learns about the delete
    {
        let mut a = replica_a.write().await;
        let report = controller.sync(&mut a, &unlock).await.unwrap();
        assert!(report.downloaded);
        assert!(!report.uploaded);
        assert_eq!(report.removed, vec![shared.fingerprint.clone()]);
    }

    let a = replica_a.read().await;
    let b = replica_b.read().await;
    assert_eq!(a.sync().change_log(), b.sync().change_log());
    let log = a.sync().change_log().unwrap();
    assert_eq!(log.get(&shared.fingerprint).unwrap().change_type, ChangeType::Delete);
    assert_eq!(log.get(&added.fingerprint).unwrap().change_type, ChangeType::Insert);

    let mut fingerprints_a: Vec<_> = a.get_keys().iter().map(|k| (k.fingerprint.clone(), k.kind)).collect();
    let mut fingerprints_b: Vec<_> = b.get_keys().iter().map(|k| (k.fingerprint.clone(), k.kind)).collect();
    fingerprints_a.sort_by(|x, y| x.0.cmp(&y.0));
    fingerprints_b.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(fingerprints_a, fingerprints_b);
    // The private key never travels or gets dropped
    assert!(a.get_key_by_fingerprint(&owner.fingerprint, Some(KeyKind::Private)).is_some());
}

#[tokio::test]
async fn test_message_from_another_key_is_rejected() {
    let transport = MemoryTransport::default();
    let controller = SyncController::new(transport.clone());
    let unlock = unlock();

    let (_registry_a, replica_a) = main_keyring().await;
    let (_registry_b, replica_b) = main_keyring().await;
    for (replica, owner) in [(&replica_a, "A <a@example.com>"), (&replica_b, "B <b@example.com>")] {
        let mut keyring = replica.write().await;
        keyring
            .import_keys(&[ImportRequest::private(generate_key(owner).private_key)])
            .await
            .unwrap();
        keyring.sync_mut().activate().await.unwrap();
    }

    controller
        .sync(&mut *replica_a.write().await, &unlock)
        .await
        .unwrap();
    // B cannot decrypt a message made for A's key
    assert!(controller
        .sync(&mut *replica_b.write().await, &unlock)
        .await
        .is_err());
}
