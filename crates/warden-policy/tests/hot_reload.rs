use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use warden_policy::{
    Effect, InMemoryPolicyStore, Policy, PolicyChange, PolicyEngine, PolicyEngineConfig, PolicyRule,
    PolicyCondition, PolicyTarget, ReloadConfig, RequestDescriptor, Subject,
};

const TABLE_SIZE: usize = 5;

/// A policy set whose IDs all carry the version tag.
fn versioned_policies(version: u32) -> Vec<Policy> {
    (0..TABLE_SIZE)
        .map(|i| {
            Policy::new(format!("v{version}-{i}"), format!("Section {i}"), Effect::Allow)
                .with_priority(i as i32)
                .with_target(PolicyTarget::url(format!("/section{i}/**")))
        })
        .collect()
}

fn version_of(policy_id: &str) -> &str {
    policy_id.split_once('-').map_or(policy_id, |(version, _)| version)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_a_mixed_table() {
    let store = Arc::new(InMemoryPolicyStore::with_policies(versioned_policies(0)));
    let engine = Arc::new(PolicyEngine::builder(store.clone()).build().await.unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let subject = Subject::new("reader");
            let request = RequestDescriptor::new("GET", "/section3/page");
            let mut observed = 0usize;
            while !done.load(Ordering::Acquire) {
                let table = engine.url_manager().table();
                assert_eq!(table.len(), TABLE_SIZE);
                let version = version_of(&table.entries()[0].policy_id).to_string();
                assert!(
                    table.entries().iter().all(|e| version_of(&e.policy_id) == version),
                    "table generation {} mixes policy versions",
                    table.generation()
                );

                let decision = engine.url_manager().check(&subject, &request).await.unwrap();
                assert!(decision.is_allowed());

                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        }));
    }

    for version in 1..=50 {
        store.replace_all(versioned_policies(version)).unwrap();
        engine.reload().await.unwrap();
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }

    let table = engine.url_manager().table();
    assert_eq!(table.generation(), 51);
    assert!(table.entries().iter().all(|e| version_of(&e.policy_id) == "v50"));
}

#[tokio::test]
async fn change_notification_rebuilds_table() {
    let store = Arc::new(InMemoryPolicyStore::new());
    let mut config = PolicyEngineConfig::default();
    config.reload = ReloadConfig::for_testing();

    let engine = PolicyEngine::builder(store.clone()).with_config(config).build().await.unwrap();
    let service = Arc::new(engine.reload_service());
    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let request = RequestDescriptor::new("GET", "/reports/weekly");
    let subject = Subject::new("alice").with_role("ANALYST");
    assert!(engine.url_manager().check(&subject, &request).await.unwrap().is_denied());

    store
        .upsert(
            Policy::new("analysts", "Analyst reports", Effect::Allow)
                .with_target(PolicyTarget::url("/reports/**"))
                .with_rule(PolicyRule::new("analysts").with_condition(PolicyCondition::pre("hasRole('ANALYST')"))),
        )
        .unwrap();
    engine.notifier().notify(PolicyChange::Created {
        policy_id: "analysts".to_string(),
    });

    let mut reloaded = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if engine.url_manager().table().len() == 1 {
            reloaded = true;
            break;
        }
    }
    assert!(reloaded, "table was not rebuilt after the change notification");
    assert!(engine.url_manager().check(&subject, &request).await.unwrap().is_allowed());

    service.shutdown();
    tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
    assert_eq!(service.stats().successful_reloads, 1);
}
