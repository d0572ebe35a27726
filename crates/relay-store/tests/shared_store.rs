//! Containers from independent owners sharing one backend.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use relay_store::{Expiry, MemoryStore, RemoteStore, SharedStore, StoreMap, Ttl};
use serde_json::{Value, json};

fn backlog(store: &SharedStore) -> StoreMap<Value> {
    StoreMap::new(store.clone(), "emit__abc", Expiry::from_secs(300), 100)
}

#[tokio::test]
async fn writer_and_reader_see_the_same_backlog() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let writer = backlog(&store);
    let reader = backlog(&store);

    writer.set_with_keep_expire("k1", &json!({"x": 1})).await.unwrap();
    writer.set_with_keep_expire("k2", &json!({"x": 2})).await.unwrap();

    let drained: Vec<(String, Value)> = reader.entries().try_collect().await.unwrap();
    assert_eq!(drained.len(), 2);
    assert_eq!(reader.shift().await.unwrap(), Some(("k1".into(), json!({"x": 1}))));
    assert_eq!(writer.size().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_keep_expire_writes_do_not_extend_lifetime() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let map = backlog(&store);

    for i in 0..5 {
        map.set_with_keep_expire(&format!("k{i}"), &json!(i)).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
    }
    assert_eq!(store.pttl("emit__abc:map").await.unwrap(), Ttl::Missing);
    assert_eq!(map.size().await.unwrap(), 0);
}
