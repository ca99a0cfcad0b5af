//! An incrementally maintained index renders the same versions as a fresh
//! rebuild over the same storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use stowage_cache::IndexCache;
use stowage_core::{join_path, IndexConfig, StorageObject};
use stowage_storage::{MemoryStorage, StorageBackend};
use stowage_test_utils::generators::arb_object_set;
use stowage_test_utils::{package_for_path, timestamp, FixtureParser};

const TENANT: &str = "org1";

fn write_listing(storage: &MemoryStorage, objects: &[StorageObject]) {
    for object in objects {
        storage
            .insert_with_mtime(
                &join_path(TENANT, &object.path),
                package_for_path(&object.path),
                object.last_modified,
            )
            .unwrap();
    }
}

async fn rendered_versions(cache: &IndexCache) -> BTreeMap<String, Vec<String>> {
    let read = cache.get_index(TENANT).await.unwrap();
    read.index()
        .entries()
        .iter()
        .map(|(name, entries)| {
            let versions = entries.iter().map(|e| e.version.clone()).collect();
            (name.clone(), versions)
        })
        .collect()
}

/// Index `before`, move storage to `after`, and compare the refreshed index
/// with one built from scratch.
async fn warm_and_cold(
    before: &[StorageObject],
    after: &[StorageObject],
    config: IndexConfig,
) -> (BTreeMap<String, Vec<String>>, BTreeMap<String, Vec<String>>) {
    let storage = Arc::new(MemoryStorage::new());
    write_listing(&storage, before);
    let warm_cache = IndexCache::new(storage.clone(), Arc::new(FixtureParser), config.clone()).unwrap();
    rendered_versions(&warm_cache).await;

    for object in before {
        if !after.iter().any(|o| o.path == object.path) {
            storage
                .delete_object(&join_path(TENANT, &object.path))
                .await
                .unwrap();
        }
    }
    write_listing(&storage, after);

    let warm = rendered_versions(&warm_cache).await;
    let cold_cache = IndexCache::new(storage, Arc::new(FixtureParser), config).unwrap();
    let cold = rendered_versions(&cold_cache).await;
    (warm, cold)
}

fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: the rendered index depends only on what is in storage, with
    /// or without a version cap and when several objects hold one version.
    #[test]
    fn prop_incremental_index_matches_rebuild(
        before in arb_object_set(16),
        after in arb_object_set(16),
        cap in 0usize..4,
    ) {
        let config = IndexConfig::default().with_version_cap(cap);
        let (warm, cold) = run(warm_and_cold(&before, &after, config));
        prop_assert_eq!(warm, cold);
    }
}

#[tokio::test]
async fn test_held_back_shared_version_returns_after_delete() {
    let before = vec![
        StorageObject::new("abc-1.0.0.tgz", timestamp(0)),
        StorageObject::new("axe-1.0.0.tgz", timestamp(1)),
        StorageObject::new("ant-2.0.0.tgz", timestamp(2)),
    ];
    // One copy of 1.0.0 and the newer 2.0.0 go away.
    let after = vec![before[0].clone()];

    let (warm, cold) = warm_and_cold(&before, &after, IndexConfig::default().with_version_cap(1)).await;

    assert_eq!(warm, cold);
    assert_eq!(warm["a"], vec!["1.0.0"]);
}
