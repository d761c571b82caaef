use super::*;
use crate::assets::MemoryAssetStore;
use crate::sched::{Clock, ManualClock};
use crate::store::memory::MemoryStore;
use canvas::doc::{AssetKind, ShapeKind, Style};
use canvas::engine::Tool;

struct Rig {
    engine: Engine,
    reconciler: Reconciler,
    channels: PageChannels,
    _guards: Vec<SubscriptionGuard>,
    deltas: mpsc::UnboundedReceiver<StoreDelta>,
    asset_store: Arc<MemoryAssetStore>,
    assets_dyn: Arc<dyn AssetStore>,
    clock: ManualClock,
}

async fn rig() -> Rig {
    let store = MemoryStore::new();
    let remote: Arc<dyn RemoteStore> = Arc::new(store);
    let (tx, rx) = mpsc::unbounded_channel();
    let (channels, guards) = PageChannels::open(&remote, "p1", &tx).await.unwrap();
    let asset_store = Arc::new(MemoryAssetStore::new());
    Rig {
        engine: Engine::new("p1", "Page 1"),
        reconciler: Reconciler::default(),
        channels,
        _guards: guards,
        deltas: rx,
        asset_store: asset_store.clone(),
        assets_dyn: asset_store,
        clock: ManualClock::new(),
    }
}

fn shape(id: &str) -> Shape {
    Shape {
        id: id.to_owned(),
        kind: ShapeKind::Rect,
        parent_id: "p1".to_owned(),
        point: [10.0, 10.0],
        size: Some([50.0, 50.0]),
        rotation: 0.0,
        style: Style::default(),
        asset_id: None,
    }
}

fn asset(id: &str) -> Asset {
    Asset {
        id: id.to_owned(),
        kind: AssetKind::Image,
        size: [100.0, 100.0],
        point: None,
        url: format!("mem://file/{id}"),
        file_name: None,
    }
}

fn shape_set(entries: &[(&str, Option<Shape>)]) -> PageDelta {
    let mut delta = PageDelta::default();
    for (id, value) in entries {
        delta.shapes.insert((*id).to_owned(), value.clone());
    }
    delta
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StoreDelta>) -> Vec<StoreDelta> {
    let mut out = Vec::new();
    while let Ok(delta) = rx.try_recv() {
        out.push(delta);
    }
    out
}

// =============================================================
// Coalescing
// =============================================================

#[tokio::test]
async fn rapid_edits_coalesce_to_last_value() {
    let mut r = rig().await;
    let mut early = shape("s1");
    early.point = [0.0, 0.0];
    let mut late = shape("s1");
    late.point = [99.0, 99.0];

    r.reconciler.record_local(shape_set(&[("s1", Some(early))]), r.clock.now());
    r.clock.advance(Duration::from_millis(100));
    r.reconciler.record_local(shape_set(&[("s1", Some(late))]), r.clock.now());

    // Window re-armed by the second edit.
    r.clock.advance(Duration::from_millis(150));
    assert!(r.reconciler.take_ready(r.clock.now()).is_none());

    r.clock.advance(Duration::from_millis(100));
    let batch = r.reconciler.take_ready(r.clock.now()).unwrap();
    assert_eq!(batch.shapes.len(), 1);
    assert_eq!(batch.shapes["s1"].as_ref().unwrap().point, [99.0, 99.0]);
}

#[tokio::test]
async fn update_then_delete_collapses_to_delete() {
    let mut r = rig().await;
    r.reconciler.record_local(shape_set(&[("s1", Some(shape("s1")))]), r.clock.now());
    r.reconciler.record_local(shape_set(&[("s1", None)]), r.clock.now());

    let batch = r.reconciler.take_now().unwrap();
    assert_eq!(batch.shapes.get("s1"), Some(&None));
}

#[tokio::test]
async fn discard_pending_drops_the_batch() {
    let mut r = rig().await;
    r.reconciler.record_local(shape_set(&[("s1", Some(shape("s1")))]), r.clock.now());
    r.reconciler.discard_pending();
    assert!(r.reconciler.take_now().is_none());
    assert!(!r.reconciler.has_pending());
}

// =============================================================
// Outbound push
// =============================================================

#[tokio::test]
async fn push_writes_shapes_and_clears_selection() {
    let mut r = rig().await;
    r.engine.patch_create(vec![shape("s1")], vec![]).unwrap();
    r.engine.select(vec!["s1".to_owned()]);

    let errors = r
        .reconciler
        .push_batch(
            &mut r.engine,
            &r.channels,
            &r.assets_dyn,
            shape_set(&[("s1", Some(shape("s1")))]),
        )
        .await;
    assert!(errors.is_empty());
    assert!(r.engine.selection().is_empty());

    let stored = r.channels.shapes.get("s1").await.unwrap().unwrap();
    assert_eq!(stored.get("parentId").unwrap(), "p1");
}

#[tokio::test]
async fn push_keeps_selection_during_text_entry() {
    let mut r = rig().await;
    r.engine.set_tool(Tool::Text);
    r.engine.patch_create(vec![shape("s1")], vec![]).unwrap();
    r.engine.select(vec!["s1".to_owned()]);

    r.reconciler
        .push_batch(
            &mut r.engine,
            &r.channels,
            &r.assets_dyn,
            shape_set(&[("s1", Some(shape("s1")))]),
        )
        .await;
    assert_eq!(r.engine.selection(), ["s1".to_owned()]);
}

#[tokio::test]
async fn asset_shape_syncs_through_asset_record_only() {
    let mut r = rig().await;
    r.engine.patch_assets(vec![asset("a1")]).unwrap();
    let mut image = shape("s1");
    image.kind = ShapeKind::Image;
    image.asset_id = Some("a1".to_owned());
    image.point = [77.0, 88.0];
    r.engine.patch_create(vec![image.clone()], vec![]).unwrap();

    let mut batch = shape_set(&[("s1", Some(image))]);
    batch.assets.insert("a1".to_owned(), Some(asset("a1")));
    r.reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, batch)
        .await;

    // No shape-namespace entry, and the asset record carries the position.
    assert!(r.channels.shapes.get("s1").await.unwrap().is_none());
    let record = r.channels.assets.get("a1").await.unwrap().unwrap();
    assert_eq!(record.get("point").unwrap(), &serde_json::json!([77.0, 88.0]));
}

#[tokio::test]
async fn removing_asset_shape_deletes_binary_exactly_once() {
    let mut r = rig().await;
    r.engine.patch_assets(vec![asset("a1")]).unwrap();
    let mut image = shape("s1");
    image.kind = ShapeKind::Image;
    image.asset_id = Some("a1".to_owned());
    r.engine.patch_create(vec![image.clone()], vec![]).unwrap();

    // Register the shape→asset link through the outbound path.
    let mut batch = shape_set(&[("s1", Some(image))]);
    batch.assets.insert("a1".to_owned(), Some(asset("a1")));
    r.reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, batch)
        .await;

    r.engine.delete(&["s1".to_owned()]).unwrap();
    let errors = r
        .reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, shape_set(&[("s1", None)]))
        .await;
    assert!(errors.is_empty());
    assert_eq!(r.asset_store.deletes(), vec!["a1".to_owned()]);
    assert!(r.channels.assets.get("a1").await.unwrap().is_none());

    // A repeated removal must not delete the binary again.
    r.reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, shape_set(&[("s1", None)]))
        .await;
    assert_eq!(r.asset_store.deletes().len(), 1);
}

#[tokio::test]
async fn binary_delete_failure_is_surfaced_but_not_fatal() {
    let mut r = rig().await;
    r.engine.patch_assets(vec![asset("a1")]).unwrap();
    let mut image = shape("s1");
    image.kind = ShapeKind::Image;
    image.asset_id = Some("a1".to_owned());
    r.engine.patch_create(vec![image.clone()], vec![]).unwrap();
    let mut batch = shape_set(&[("s1", Some(image))]);
    batch.assets.insert("a1".to_owned(), Some(asset("a1")));
    r.reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, batch)
        .await;

    r.asset_store.fail_requests(true);
    let mut batch = shape_set(&[("s1", None), ("s2", Some(shape("s2")))]);
    batch.bindings.insert("b1".to_owned(), None);
    let errors = r
        .reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, batch)
        .await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], SyncError::DeleteFailure { .. }));
    // The unrelated shape in the same batch still made it out.
    r.asset_store.fail_requests(false);
    assert!(r.channels.shapes.get("s2").await.unwrap().is_some());
}

// =============================================================
// Self-echo
// =============================================================

#[tokio::test]
async fn own_write_echo_is_consumed_silently() {
    let mut r = rig().await;
    r.engine.patch_create(vec![shape("s1")], vec![]).unwrap();
    r.reconciler
        .push_batch(
            &mut r.engine,
            &r.channels,
            &r.assets_dyn,
            shape_set(&[("s1", Some(shape("s1")))]),
        )
        .await;

    let echoes = drain(&mut r.deltas);
    assert!(!echoes.is_empty());
    for echo in &echoes {
        assert_eq!(
            r.reconciler.on_remote_mutation(&mut r.engine, echo),
            InboundOutcome::SelfEcho
        );
    }
    // A genuine remote overwrite of the same key still applies.
    let mut moved = shape("s1");
    moved.point = [500.0, 500.0];
    let remote_delta = StoreDelta {
        namespace: "p1-shapes".to_owned(),
        key: "s1".to_owned(),
        value: Some(serde_json::to_value(&moved).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &remote_delta),
        InboundOutcome::Applied
    );
    assert_eq!(r.engine.get_shape("s1").unwrap().point, [500.0, 500.0]);
}

#[tokio::test]
async fn delete_echo_matches_recorded_tombstone() {
    let mut r = rig().await;
    r.engine.patch_create(vec![shape("s1")], vec![]).unwrap();
    r.reconciler
        .push_batch(
            &mut r.engine,
            &r.channels,
            &r.assets_dyn,
            shape_set(&[("s1", Some(shape("s1")))]),
        )
        .await;
    drain(&mut r.deltas);

    r.engine.delete(&["s1".to_owned()]).unwrap();
    r.reconciler
        .push_batch(&mut r.engine, &r.channels, &r.assets_dyn, shape_set(&[("s1", None)]))
        .await;

    let echoes = drain(&mut r.deltas);
    assert_eq!(echoes.len(), 1);
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &echoes[0]),
        InboundOutcome::SelfEcho
    );
}

// =============================================================
// Inbound guards
// =============================================================

#[tokio::test]
async fn cross_page_writes_are_dropped() {
    let mut r = rig().await;
    let delta = StoreDelta {
        namespace: "p9-shapes".to_owned(),
        key: "s1".to_owned(),
        value: Some(serde_json::to_value(shape("s1")).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &delta),
        InboundOutcome::StalePage
    );

    // Same for a right-namespace write whose parentId disagrees.
    let mut foreign = shape("s2");
    foreign.parent_id = "p9".to_owned();
    let delta = StoreDelta {
        namespace: "p1-shapes".to_owned(),
        key: "s2".to_owned(),
        value: Some(serde_json::to_value(&foreign).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &delta),
        InboundOutcome::StalePage
    );
    assert!(r.engine.get_shape("s2").is_none());
}

#[tokio::test]
async fn malformed_payload_is_isolated() {
    let mut r = rig().await;
    let bad = StoreDelta {
        namespace: "p1-shapes".to_owned(),
        key: "s1".to_owned(),
        value: Some(serde_json::json!({"id": 42})),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &bad),
        InboundOutcome::Invalid
    );

    let good = StoreDelta {
        namespace: "p1-shapes".to_owned(),
        key: "s2".to_owned(),
        value: Some(serde_json::to_value(shape("s2")).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &good),
        InboundOutcome::Applied
    );
}

#[tokio::test]
async fn delete_of_absent_entity_never_aborts() {
    let mut r = rig().await;
    for namespace in ["p1-shapes", "p1-bindings", "p1-assets"] {
        let delta = StoreDelta {
            namespace: namespace.to_owned(),
            key: "ghost".to_owned(),
            value: None,
        };
        assert_eq!(
            r.reconciler.on_remote_mutation(&mut r.engine, &delta),
            InboundOutcome::Removed
        );
    }
}

#[tokio::test]
async fn flat_namespaces_are_ignored() {
    let mut r = rig().await;
    let delta = StoreDelta {
        namespace: "users".to_owned(),
        key: "u1".to_owned(),
        value: Some(serde_json::json!({})),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &delta),
        InboundOutcome::Ignored
    );
}

// =============================================================
// Asset ordering
// =============================================================

#[tokio::test]
async fn shape_before_asset_is_archived_then_materialized() {
    let mut r = rig().await;
    let mut image = shape("s1");
    image.kind = ShapeKind::Image;
    image.asset_id = Some("a1".to_owned());
    image.point = [5.0, 6.0];

    let shape_delta = StoreDelta {
        namespace: "p1-shapes".to_owned(),
        key: "s1".to_owned(),
        value: Some(serde_json::to_value(&image).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &shape_delta),
        InboundOutcome::Deferred
    );
    assert!(r.engine.get_shape("s1").is_none());
    assert_eq!(r.reconciler.archived_count(), 1);

    let asset_delta = StoreDelta {
        namespace: "p1-assets".to_owned(),
        key: "a1".to_owned(),
        value: Some(serde_json::to_value(asset("a1")).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &asset_delta),
        InboundOutcome::Applied
    );
    // The archived shape materialized with its original identity.
    let restored = r.engine.get_shape("s1").unwrap();
    assert_eq!(restored.point, [5.0, 6.0]);
    assert_eq!(r.reconciler.archived_count(), 0);
}

#[tokio::test]
async fn asset_first_synthesizes_a_shape() {
    let mut r = rig().await;
    let asset_delta = StoreDelta {
        namespace: "p1-assets".to_owned(),
        key: "a1".to_owned(),
        value: Some(serde_json::to_value(asset("a1")).unwrap()),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &asset_delta),
        InboundOutcome::Applied
    );
    let synthesized = r.engine.doc().shape_by_asset("p1", "a1").unwrap();
    assert_eq!(synthesized.kind, ShapeKind::Image);
}

#[tokio::test]
async fn moved_asset_record_repositions_its_shape() {
    let mut r = rig().await;
    let mut record = asset("a1");
    record.point = Some([10.0, 10.0]);
    let delta = StoreDelta {
        namespace: "p1-assets".to_owned(),
        key: "a1".to_owned(),
        value: Some(serde_json::to_value(&record).unwrap()),
    };
    r.reconciler.on_remote_mutation(&mut r.engine, &delta);

    record.point = Some([300.0, 400.0]);
    let delta = StoreDelta {
        namespace: "p1-assets".to_owned(),
        key: "a1".to_owned(),
        value: Some(serde_json::to_value(&record).unwrap()),
    };
    r.reconciler.on_remote_mutation(&mut r.engine, &delta);

    let shape = r.engine.doc().shape_by_asset("p1", "a1").unwrap();
    assert_eq!(shape.point, [300.0, 400.0]);
}

#[tokio::test]
async fn asset_delete_removes_shape_and_record() {
    let mut r = rig().await;
    let delta = StoreDelta {
        namespace: "p1-assets".to_owned(),
        key: "a1".to_owned(),
        value: Some(serde_json::to_value(asset("a1")).unwrap()),
    };
    r.reconciler.on_remote_mutation(&mut r.engine, &delta);
    assert!(r.engine.doc().shape_by_asset("p1", "a1").is_some());

    let delete = StoreDelta { namespace: "p1-assets".to_owned(), key: "a1".to_owned(), value: None };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &delete),
        InboundOutcome::Removed
    );
    assert!(r.engine.doc().shape_by_asset("p1", "a1").is_none());
    assert!(r.engine.doc().asset("p1", "a1").is_none());
}

// =============================================================
// Bindings
// =============================================================

#[tokio::test]
async fn binding_upsert_and_delete_round_trip() {
    let mut r = rig().await;
    r.engine
        .patch_create(vec![shape("s1"), shape("s2")], vec![])
        .unwrap();

    let binding = serde_json::json!({"id": "b1", "fromId": "s1", "toId": "s2"});
    let delta = StoreDelta {
        namespace: "p1-bindings".to_owned(),
        key: "b1".to_owned(),
        value: Some(binding),
    };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &delta),
        InboundOutcome::Applied
    );
    assert!(r.engine.doc().binding("p1", "b1").is_some());

    let delete =
        StoreDelta { namespace: "p1-bindings".to_owned(), key: "b1".to_owned(), value: None };
    assert_eq!(
        r.reconciler.on_remote_mutation(&mut r.engine, &delete),
        InboundOutcome::Removed
    );
    assert!(r.engine.doc().binding("p1", "b1").is_none());
}
