use std::sync::Arc;

use kraken_core::error::Error;
use kraken_core::event::{chan_sender, Event, EventType, MutationKind};
use kraken_core::graph::StaticPlanner;
use kraken_core::node::{Node, NodeId};
use kraken_core::query::QueryEngine;
use kraken_core::store::{NodeStore, View};
use kraken_core::value::Value;

fn new_engine() -> QueryEngine {
    let bus = kraken_core::event::EventBus::spawn();
    let store = NodeStore::new(NodeId::new("self"), bus.clone());
    let planner = Arc::new(StaticPlanner::new(vec![], vec![]));
    QueryEngine::new(store, bus, planner)
}

#[tokio::test]
async fn create_then_read_round_trips_full_node() {
    let engine = new_engine();
    let mut n1 = Node::new(NodeId::new("n1"));
    n1.set_field("physState", Value::Enum("POWER_OFF".to_string()));
    engine.create(n1.clone()).await.unwrap();

    let read_back = engine.read(&NodeId::new("n1")).await.unwrap();
    assert_eq!(read_back, n1);
}

#[tokio::test]
async fn partial_update_merges_and_reports_only_the_changed_url() {
    let engine = new_engine();
    let mut n1 = Node::new(NodeId::new("n1"));
    n1.set_field("physState", Value::Enum("POWER_OFF".to_string()));
    n1.set_field("runState", Value::Enum("UNKNOWN".to_string()));
    engine.create(n1).await.unwrap();

    let mut patch = Node::new(NodeId::new("n1"));
    patch.set_field("runState", Value::Enum("SYNC".to_string()));
    let (merged, diff) = engine.update(patch).await.unwrap();

    assert_eq!(diff, vec!["n1/runState".to_string()]);
    assert_eq!(merged.field("physState"), Some(&Value::Enum("POWER_OFF".to_string())));
    assert_eq!(merged.field("runState"), Some(&Value::Enum("SYNC".to_string())));
}

#[tokio::test]
async fn event_fan_out_delivers_one_state_change_to_every_subscriber() {
    let engine = new_engine();
    engine.create(Node::new(NodeId::new("n1"))).await.unwrap();

    let (tx1, mut rx1) = tokio::sync::mpsc::channel(8);
    let (tx2, mut rx2) = tokio::sync::mpsc::channel(8);
    engine
        .bus()
        .subscribe_fn("watcher-1", EventType::StateChange, |_| true, move |ev| chan_sender(ev, &tx1))
        .await;
    engine
        .bus()
        .subscribe_fn("watcher-2", EventType::StateChange, |_| true, move |ev| chan_sender(ev, &tx2))
        .await;

    let mut patch = Node::new(NodeId::new("n1"));
    patch.set_field("runState", Value::Enum("SYNC".to_string()));
    engine.update(patch).await.unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let event = rx.recv().await.unwrap();
        match event {
            Event::StateChange { url, value, .. } => {
                assert_eq!(url, "n1/runState");
                assert_eq!(value, Value::Enum("SYNC".to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "each subscriber should see exactly one event");
    }
}

#[tokio::test]
async fn mutation_filter_delivers_only_the_subscribed_modules_events() {
    let engine = new_engine();
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    engine
        .bus()
        .subscribe_fn(
            "MutationFor:svc-a",
            EventType::Mutation,
            |ev| ev.mutation_module_id() == Some("svc-a"),
            move |ev| chan_sender(ev, &tx),
        )
        .await;

    engine.bus().emit_one(Event::mutation(
        "svc-a",
        "m1",
        MutationKind::Add,
        Node::new(NodeId::new("n1")),
        Node::new(NodeId::new("n1")),
    ));
    engine.bus().emit_one(Event::mutation(
        "svc-b",
        "m2",
        MutationKind::Add,
        Node::new(NodeId::new("n1")),
        Node::new(NodeId::new("n1")),
    ));

    let received = rx.recv().await.unwrap();
    assert_eq!(received.mutation_module_id(), Some("svc-a"));
    assert!(rx.try_recv().is_err(), "the svc-b mutation must not reach this subscriber");
}

#[tokio::test]
async fn discovery_path_reports_no_path_until_the_planner_supplies_one() {
    let engine = new_engine();
    engine.create(Node::new(NodeId::new("n1"))).await.unwrap();

    let err = engine.read_node_mutation_path("n1").unwrap_err();
    assert_eq!(err, Error::NoPath("n1".to_string()));
}

#[tokio::test]
async fn freeze_rejects_writes_across_both_views_and_thaw_restores_them() {
    let engine = new_engine();
    engine.freeze();

    let create_err = engine.create(Node::new(NodeId::new("n1"))).await.unwrap_err();
    assert_eq!(create_err, Error::Frozen);

    let update_err = engine.update_dsc(Node::new(NodeId::new("self"))).await.unwrap_err();
    assert_eq!(update_err, Error::Frozen);

    engine.thaw();
    engine.create(Node::new(NodeId::new("n1"))).await.unwrap();
    let all = engine.read_all().await;
    assert!(all.iter().any(|n| n.id == NodeId::new("n1")));
}

#[tokio::test]
async fn self_always_present_in_both_views_and_survives_delete_all() {
    let engine = new_engine();
    assert_eq!(engine.read(engine.self_id()).await.unwrap().id, NodeId::new("self"));
    assert_eq!(engine.read_dsc(engine.self_id()).await.unwrap().id, NodeId::new("self"));

    engine.create(Node::new(NodeId::new("n1"))).await.unwrap();
    let removed = engine.delete_all().await.unwrap();
    assert_eq!(removed.len(), 1);

    let remaining = engine.read_all().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, NodeId::new("self"));
}

#[tokio::test]
async fn views_are_independent_update_to_cfg_does_not_touch_dsc() {
    let engine = new_engine();
    engine.create(Node::new(NodeId::new("n1"))).await.unwrap();
    assert!(engine.read_dsc(&NodeId::new("n1")).await.is_err());

    let store = engine.store();
    assert!(store.read(View::Dsc, &NodeId::new("n1")).await.is_err());
    assert!(store.read(View::Cfg, &NodeId::new("n1")).await.is_ok());
}
