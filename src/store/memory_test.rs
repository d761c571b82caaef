use super::*;

fn store() -> MemoryStore {
    MemoryStore::new()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StoreDelta>) -> Vec<StoreDelta> {
    let mut out = Vec::new();
    while let Ok(delta) = rx.try_recv() {
        out.push(delta);
    }
    out
}

// =============================================================
// Basic key-value semantics
// =============================================================

#[tokio::test]
async fn set_get_round_trip() {
    let store = store();
    let handle = store.create("page1-shapes");
    handle.set("s1", serde_json::json!({"x": 1})).await.unwrap();
    assert_eq!(
        handle.get("s1").await.unwrap(),
        Some(serde_json::json!({"x": 1}))
    );
    assert_eq!(handle.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn last_write_wins_per_key() {
    let store = store();
    let a = store.create("ns");
    let b = store.create("ns");
    a.set("k", serde_json::json!(1)).await.unwrap();
    b.set("k", serde_json::json!(2)).await.unwrap();
    assert_eq!(a.get("k").await.unwrap(), Some(serde_json::json!(2)));
}

#[tokio::test]
async fn delete_removes_entry() {
    let store = store();
    let handle = store.create("ns");
    handle.set("k", serde_json::json!(true)).await.unwrap();
    handle.delete("k").await.unwrap();
    assert_eq!(handle.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn bulk_operations_apply_in_order() {
    let store = store();
    let handle = store.create("ns");
    handle
        .bulk_set(vec![
            StoreEntry::new("a", serde_json::json!(1)),
            StoreEntry::new("b", serde_json::json!(2)),
            StoreEntry::new("a", serde_json::json!(3)),
        ])
        .await
        .unwrap();
    let all = handle.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.get("a"), Some(&serde_json::json!(3)));

    handle.bulk_delete(vec!["a".into(), "b".into()]).await.unwrap();
    assert!(handle.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn populate_is_idempotent() {
    let store = store();
    store.populate("ns").await.unwrap();
    let handle = store.create("ns");
    handle.set("k", serde_json::json!(1)).await.unwrap();
    store.populate("ns").await.unwrap();
    assert_eq!(handle.get("k").await.unwrap(), Some(serde_json::json!(1)));
}

// =============================================================
// Subscriptions
// =============================================================

#[tokio::test]
async fn writer_receives_its_own_mutations() {
    let store = store();
    let handle = store.create("ns");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = handle.subscribe("*", tx);

    handle.set("k", serde_json::json!(7)).await.unwrap();
    let deltas = drain(&mut rx);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].key, "k");
    assert_eq!(deltas[0].value, Some(serde_json::json!(7)));
}

#[tokio::test]
async fn all_subscribers_observe_each_mutation() {
    let store = store();
    let writer = store.create("ns");
    let reader = store.create("ns");
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let _ga = writer.subscribe("*", tx_a);
    let _gb = reader.subscribe("*", tx_b);

    writer.set("k", serde_json::json!("v")).await.unwrap();
    writer.delete("k").await.unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let deltas = drain(rx);
        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].value.is_some());
        assert!(deltas[1].value.is_none());
    }
}

#[tokio::test]
async fn pattern_filters_keys() {
    let store = store();
    let handle = store.create("ns");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = handle.subscribe("shape:", tx);

    handle.set("shape:1", serde_json::json!(1)).await.unwrap();
    handle.set("binding:1", serde_json::json!(2)).await.unwrap();

    let deltas = drain(&mut rx);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].key, "shape:1");
}

#[tokio::test]
async fn dropping_the_guard_unsubscribes() {
    let store = store();
    let handle = store.create("ns");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let guard = handle.subscribe("*", tx);

    handle.set("k", serde_json::json!(1)).await.unwrap();
    drop(guard);
    handle.set("k", serde_json::json!(2)).await.unwrap();

    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let store = store();
    let shapes = store.create("page1-shapes");
    let bindings = store.create("page1-bindings");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = shapes.subscribe("*", tx);

    bindings.set("b1", serde_json::json!(1)).await.unwrap();
    assert!(drain(&mut rx).is_empty());
    assert!(shapes.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_of_absent_key_still_notifies() {
    // LWW tombstones may arrive more than once; receivers guard individually.
    let store = store();
    let handle = store.create("ns");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = handle.subscribe("*", tx);

    handle.delete("never-existed").await.unwrap();
    let deltas = drain(&mut rx);
    assert_eq!(deltas.len(), 1);
    assert!(deltas[0].value.is_none());
}
