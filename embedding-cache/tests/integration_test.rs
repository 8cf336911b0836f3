//! Multi-instance behavior of the embedding cache.
//!
//! Two controllers sharing one in-process store stand in for two gateway
//! instances sharing one server: writes travel through the shared tier,
//! and invalidation notices travel through its pub/sub channel.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;

use toolgate_embedding_cache::{CacheConfig, CacheController, MemoryStore, RemoteStore};

/// How long tests wait for a pub/sub notice to land.
const PROPAGATION: Duration = Duration::from_millis(200);

fn instance_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        enable_distributed_cache: true,
        max_prefetch_items: 0,
        ..CacheConfig::default()
    }
    .with_file_cache_directory(dir.path())
    .with_key_prefix("itest:")
}

async fn instance(store: &Arc<MemoryStore>, dir: &TempDir) -> CacheController {
    let store: Arc<dyn RemoteStore> = Arc::clone(store) as Arc<dyn RemoteStore>;
    CacheController::with_remote_store(instance_config(dir), store)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cross_instance_convergence() {
    let store = MemoryStore::shared();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = instance(&store, &dir_a).await;
    let b = instance(&store, &dir_b).await;

    let vector = vec![0.1, 0.2, 0.3];
    assert!(a.set("foo", "m", vector.clone()).await);

    // B reads through the shared tier immediately.
    assert_eq!(b.get("foo", "m").await, Some(vector));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_invalidation_propagation_on_delete() {
    let store = MemoryStore::shared();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = instance(&store, &dir_a).await;
    let b = instance(&store, &dir_b).await;

    let vector = vec![1.0, 2.0];
    a.set("foo", "m", vector.clone()).await;

    // B caches the value in its own memory tier.
    assert_eq!(b.get("foo", "m").await, Some(vector));

    // A deletes; the notice must evict B's private copy, and B's file
    // tier never held the entry, so the next read is a miss everywhere.
    assert!(a.delete("foo", "m").await);
    sleep(PROPAGATION).await;

    assert_eq!(b.get("foo", "m").await, None);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_peer_set_drops_stale_memory_copy() {
    let store = MemoryStore::shared();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = instance(&store, &dir_a).await;
    let b = instance(&store, &dir_b).await;

    a.set("key", "m", vec![1.0]).await;
    assert_eq!(b.get("key", "m").await, Some(vec![1.0]));

    // A overwrites; B's memory copy of the old value must go, so the
    // next read surfaces the new value from the shared tier.
    a.set("key", "m", vec![2.0]).await;
    sleep(PROPAGATION).await;

    assert_eq!(b.get("key", "m").await, Some(vec![2.0]));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_model_scoped_clear_across_instances() {
    let store = MemoryStore::shared();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = instance(&store, &dir_a).await;
    let b = instance(&store, &dir_b).await;

    a.set("one", "m1", vec![1.0]).await;
    a.set("two", "m1", vec![2.0]).await;
    a.set("one", "m2", vec![3.0]).await;

    // Warm B's memory tier with every entry.
    assert!(b.get("one", "m1").await.is_some());
    assert!(b.get("two", "m1").await.is_some());
    assert!(b.get("one", "m2").await.is_some());

    assert!(a.clear_model("m1").await >= 2);
    sleep(PROPAGATION).await;

    assert_eq!(b.get("one", "m1").await, None);
    assert_eq!(b.get("two", "m1").await, None);
    assert!(b.get("one", "m2").await.is_some());

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_clear_propagates() {
    let store = MemoryStore::shared();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = instance(&store, &dir_a).await;
    let b = instance(&store, &dir_b).await;

    a.set("x", "m", vec![1.0]).await;
    assert!(b.get("x", "m").await.is_some());

    a.clear().await;
    sleep(PROPAGATION).await;

    assert_eq!(b.get("x", "m").await, None);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_compressed_values_cross_instances() {
    let store = MemoryStore::shared();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = instance(&store, &dir_a).await;
    let b = instance(&store, &dir_b).await;

    // Large enough that the shared store holds the compressed form.
    let vector: Vec<f32> = (0..4096).map(|i| (i % 17) as f32).collect();
    assert!(a.set("large", "m", vector.clone()).await);

    assert_eq!(b.get("large", "m").await, Some(vector));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_local_read_after_write_is_immediate() {
    let store = MemoryStore::shared();
    let dir = TempDir::new().unwrap();
    let a = instance(&store, &dir).await;

    // Same instance: no staleness window, and its own pub/sub echo must
    // not evict the entry it just wrote.
    a.set("self", "m", vec![9.0]).await;
    assert_eq!(a.get("self", "m").await, Some(vec![9.0]));

    sleep(PROPAGATION).await;
    assert_eq!(a.get("self", "m").await, Some(vec![9.0]));

    a.close().await;
}
