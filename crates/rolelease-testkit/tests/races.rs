//! Concurrent operations on the same key.

use std::sync::Arc;

use rolelease::{FireOutcome, RevokeOutcome};
use rolelease_core::{HistoryAction, DAY_MS};
use rolelease_store::GrantStore;
use rolelease_testkit::fixtures::{advance, key, request, TestFixture, T0};

const D: i64 = 50 * DAY_MS;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_serialize_per_key() {
    let fx = Arc::new(TestFixture::new());

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = fx.engine.clone();
            tokio::spawn(async move { engine.grant_or_renew(&request("1"), T0).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(fx.store.scan_all().await.unwrap().len(), 1);
    assert_eq!(fx.row("1").await.unwrap().expires_at, T0 + 20 * D);
    assert_eq!(fx.engine.armed_deadline(&key("1")), Some(T0 + 20 * D));

    let history = fx.engine.history(&key("1")).await.unwrap();
    assert_eq!(history.len(), 20);
    let creates = history
        .iter()
        .filter(|e| e.action == HistoryAction::Create)
        .count();
    assert_eq!(creates, 1);

    fx.engine.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unrelated_keys_proceed_in_parallel() {
    let fx = Arc::new(TestFixture::new());

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let engine = fx.engine.clone();
            tokio::spawn(async move {
                engine
                    .grant_or_renew(&request(&format!("user-{i}")), T0)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(fx.store.scan_all().await.unwrap().len(), 50);
    assert_eq!(fx.engine.armed_count(), 50);
    fx.engine.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_revoke_racing_expiry_acts_once() {
    for round in 0..20 {
        let fx = TestFixture::new();
        let subject = format!("r{round}");
        let seeded = fx.seed(&subject, T0 - D - DAY_MS).await;
        let k = key(&subject);

        let revoke = {
            let engine = fx.engine.clone();
            let k = k.clone();
            tokio::spawn(async move { engine.revoke(&k).await })
        };
        let expire = {
            let engine = fx.engine.clone();
            let k = k.clone();
            tokio::spawn(async move { engine.expire(&k, seeded.expires_at).await })
        };

        let revoked = revoke.await.unwrap().unwrap();
        let fired = expire.await.unwrap().unwrap();

        match (revoked, fired) {
            (RevokeOutcome::Revoked, FireOutcome::Superseded) => {
                assert!(fx.backend.removed().is_empty());
            }
            (RevokeOutcome::NothingToRevoke, FireOutcome::Revoked { .. }) => {
                assert_eq!(fx.backend.removed().len(), 1);
            }
            other => panic!("both paths acted: {other:?}"),
        }
        assert!(fx.row(&subject).await.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_renewal_just_before_deadline_wins() {
    let fx = TestFixture::new();
    fx.grant("1").await;

    advance(D - 1_000).await;
    fx.grant("1").await;
    advance(2_000).await;

    // The first deadline passed, but the renewal moved it.
    let row = fx.row("1").await.unwrap();
    assert_eq!(row.expires_at, T0 + 2 * D);
    assert!(fx.backend.removed().is_empty());
    assert_eq!(fx.engine.armed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timer_after_revoke_and_regrant() {
    let fx = TestFixture::new();
    let first = fx.grant("1").await.expires_at();

    fx.engine.revoke(&key("1")).await.unwrap();
    advance(DAY_MS).await;
    let second = fx.grant("1").await.expires_at();
    assert_ne!(first, second);

    // A fire for the old deadline must not touch the new grant.
    advance(D - DAY_MS + 1_000).await;
    assert_eq!(
        fx.engine.expire(&key("1"), first).await.unwrap(),
        FireOutcome::Superseded
    );
    assert_eq!(fx.row("1").await.unwrap().expires_at, second);
}
