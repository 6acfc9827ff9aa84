//! The dual-view node store: independent `Cfg` and `Dsc` maps, each behind
//! one lock held for the whole merge+diff+publish sequence so readers never
//! see a half-applied update and listeners never see state-change events
//! out of order with the store.

use crate::error::{Error, Result};
use crate::event::{Event, EventBus};
use crate::node::{Node, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Which of the two parallel maps an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Cfg,
    Dsc,
}

impl View {
    fn label(self) -> &'static str {
        match self {
            View::Cfg => "cfg",
            View::Dsc => "dsc",
        }
    }
}

type Map = HashMap<NodeId, Node>;

/// Dual-view node store. Cheap to clone (an `Arc` handle), so the Query
/// Engine and the RPC gateway can share one without wrapping it again.
#[derive(Clone)]
pub struct NodeStore {
    cfg: Arc<RwLock<Map>>,
    dsc: Arc<RwLock<Map>>,
    frozen: Arc<AtomicBool>,
    bus: EventBus,
    self_id: NodeId,
}

impl NodeStore {
    /// Creates a store seeded with `self_id` present, empty, in both views —
    /// Self always exists in both maps — and initially thawed.
    pub fn new(self_id: NodeId, bus: EventBus) -> Self {
        let mut cfg = HashMap::new();
        let mut dsc = HashMap::new();
        cfg.insert(self_id.clone(), Node::new(self_id.clone()));
        dsc.insert(self_id.clone(), Node::new(self_id.clone()));
        Self {
            cfg: Arc::new(RwLock::new(cfg)),
            dsc: Arc::new(RwLock::new(dsc)),
            frozen: Arc::new(AtomicBool::new(false)),
            bus,
            self_id,
        }
    }

    /// Seeds (or replaces) Self's Cfg with `initial`, bypassing the freeze
    /// check and diff/publish machinery — used once at startup before the
    /// gateway accepts connections.
    pub async fn seed_self_cfg(&self, initial: Node) {
        let mut cfg = self.cfg.write().await;
        cfg.insert(self.self_id.clone(), initial);
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    fn map(&self, view: View) -> &Arc<RwLock<Map>> {
        match view {
            View::Cfg => &self.cfg,
            View::Dsc => &self.dsc,
        }
    }

    pub fn frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        info!("node store frozen");
    }

    pub fn thaw(&self) {
        self.frozen.store(false, Ordering::SeqCst);
        info!("node store thawed");
    }

    fn check_thawed(&self) -> Result<()> {
        if self.frozen() {
            Err(Error::Frozen)
        } else {
            Ok(())
        }
    }

    pub async fn create(&self, view: View, node: Node) -> Result<Node> {
        self.check_thawed()?;
        let map = self.map(view);
        let mut guard = map.write().await;
        if self.frozen() {
            return Err(Error::Frozen);
        }
        if guard.contains_key(&node.id) {
            return Err(Error::AlreadyExists(node.id.to_string()));
        }
        guard.insert(node.id.clone(), node.clone());

        info!(node_id = %node.id, view = view.label(), "node created");
        self.bus.emit(vec![Event::state_change(
            view,
            crate::url::Url::whole_node(node.id.as_str()).to_string(),
            crate::value::Value::Record(node.fields.clone()),
        )]);
        drop(guard);
        Ok(node)
    }

    pub async fn read(&self, view: View, id: &NodeId) -> Result<Node> {
        let map = self.map(view);
        let guard = map.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Partial-merge update: `node`'s set fields overwrite the stored
    /// node's; untouched fields are preserved. Returns the merged node and
    /// the URLs whose values changed.
    pub async fn update(&self, view: View, node: Node) -> Result<(Node, Vec<String>)> {
        self.check_thawed()?;
        let map = self.map(view);
        let mut guard = map.write().await;
        if self.frozen() {
            return Err(Error::Frozen);
        }
        let existing = guard
            .get(&node.id)
            .cloned()
            .ok_or_else(|| Error::NotFound(node.id.to_string()))?;

        let mut merged = existing.clone();
        merged.merge(&node);
        let diff = existing.diff(&merged);
        guard.insert(node.id.clone(), merged.clone());

        // Published while still holding the write guard, so publish order
        // stays serialized with lock-acquisition order across concurrent
        // writers to this view, not just within one emit() call.
        if !diff.is_empty() {
            info!(node_id = %merged.id, view = view.label(), changed = diff.len(), "node updated");
            let events = diff
                .iter()
                .filter_map(|url| {
                    let parsed = crate::url::Url::parse(url).ok()?;
                    let value = merged.get_value(&parsed).ok()?;
                    Some(Event::state_change(view, url.clone(), value))
                })
                .collect();
            self.bus.emit(events);
        }
        drop(guard);

        Ok((merged, diff))
    }

    pub async fn delete(&self, view: View, id: &NodeId) -> Result<Node> {
        self.check_thawed()?;
        let map = self.map(view);
        let mut guard = map.write().await;
        if self.frozen() {
            return Err(Error::Frozen);
        }
        let removed = guard
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        info!(node_id = %id, view = view.label(), "node deleted");
        self.bus.emit(vec![Event::state_change(
            view,
            crate::url::Url::whole_node(id.as_str()).to_string(),
            crate::value::Value::Record(Default::default()),
        )]);
        drop(guard);
        Ok(removed)
    }

    pub async fn read_all(&self, view: View) -> Vec<Node> {
        let map = self.map(view);
        let guard = map.read().await;
        let mut nodes: Vec<Node> = guard.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Deletes every node except Self, returning what was removed.
    pub async fn delete_all(&self, view: View) -> Result<Vec<Node>> {
        self.check_thawed()?;
        let map = self.map(view);
        let mut guard = map.write().await;
        if self.frozen() {
            return Err(Error::Frozen);
        }
        let removable: Vec<NodeId> = guard
            .keys()
            .filter(|id| **id != self.self_id)
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(removable.len());
        for id in &removable {
            if let Some(n) = guard.remove(id) {
                removed.push(n);
            }
        }

        for node in &removed {
            self.bus.emit(vec![Event::state_change(
                view,
                crate::url::Url::whole_node(node.id.as_str()).to_string(),
                crate::value::Value::Record(Default::default()),
            )]);
        }
        info!(view = view.label(), count = removed.len(), "deleted all nodes");
        drop(guard);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::value::Value;

    fn node(id: &str, fields: &[(&str, Value)]) -> Node {
        let mut n = Node::new(NodeId::new(id));
        for (k, v) in fields {
            n.set_field(*k, v.clone());
        }
        n
    }

    #[tokio::test]
    async fn create_then_read() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus);
        let n1 = node("n1", &[("physState", Value::Enum("POWER_OFF".to_string()))]);
        store.create(View::Cfg, n1.clone()).await.unwrap();

        let read_back = store.read(View::Cfg, &NodeId::new("n1")).await.unwrap();
        assert_eq!(read_back, n1);

        let all = store.read_all(View::Cfg).await;
        let ids: Vec<String> = all.iter().map(|n| n.id.to_string()).collect();
        assert!(ids.contains(&"n1".to_string()));
        assert!(ids.contains(&"self".to_string()));
    }

    #[tokio::test]
    async fn partial_update_returns_diff_and_preserves_other_fields() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus);
        let n1 = node(
            "n1",
            &[
                ("physState", Value::Enum("POWER_OFF".to_string())),
                ("runState", Value::Enum("UNKNOWN".to_string())),
            ],
        );
        store.create(View::Cfg, n1).await.unwrap();

        let patch = node("n1", &[("runState", Value::Enum("SYNC".to_string()))]);
        let (merged, diff) = store.update(View::Cfg, patch).await.unwrap();

        assert_eq!(diff, vec!["n1/runState".to_string()]);
        assert_eq!(merged.field("physState"), Some(&Value::Enum("POWER_OFF".to_string())));
    }

    #[tokio::test]
    async fn merge_idempotence_second_update_yields_empty_diff() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus);
        store.create(View::Cfg, node("n1", &[])).await.unwrap();

        let patch = node("n1", &[("runState", Value::Enum("SYNC".to_string()))]);
        let (_, first_diff) = store.update(View::Cfg, patch.clone()).await.unwrap();
        assert_eq!(first_diff.len(), 1);

        let (_, second_diff) = store.update(View::Cfg, patch).await.unwrap();
        assert!(second_diff.is_empty());
    }

    #[tokio::test]
    async fn view_independence() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus);
        store.create(View::Cfg, node("n1", &[])).await.unwrap();

        assert!(store.read(View::Dsc, &NodeId::new("n1")).await.is_err());
        let cfg_all = store.read_all(View::Cfg).await;
        let dsc_all = store.read_all(View::Dsc).await;
        assert_eq!(cfg_all.len(), 2); // self + n1
        assert_eq!(dsc_all.len(), 1); // self only
    }

    #[tokio::test]
    async fn freeze_rejects_writes_then_thaw_allows_them() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus);
        store.freeze();
        assert!(store.frozen());

        let err = store.create(View::Cfg, node("n1", &[])).await.unwrap_err();
        assert_eq!(err, Error::Frozen);

        store.thaw();
        assert!(!store.frozen());
        store.create(View::Cfg, node("n1", &[])).await.unwrap();
    }

    #[tokio::test]
    async fn delete_all_preserves_self() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus);
        store.create(View::Cfg, node("n1", &[])).await.unwrap();
        store.create(View::Cfg, node("n2", &[])).await.unwrap();

        let removed = store.delete_all(View::Cfg).await.unwrap();
        assert_eq!(removed.len(), 2);

        let remaining = store.read_all(View::Cfg).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, NodeId::new("self"));
    }

    #[tokio::test]
    async fn diff_completeness_observed_by_all_subscribed_listener() {
        let bus = EventBus::spawn();
        let store = NodeStore::new(NodeId::new("self"), bus.clone());
        store.create(View::Cfg, node("n1", &[("runState", Value::Enum("UNKNOWN".to_string()))])).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        bus.subscribe_fn("watch-all", EventType::All, move |_| true, move |ev| {
            crate::event::chan_sender(ev, &tx)
        }).await;

        let patch = node("n1", &[("runState", Value::Enum("SYNC".to_string()))]);
        store.update(View::Cfg, patch).await.unwrap();

        let received = rx.recv().await.unwrap();
        match received {
            Event::StateChange { url, value, .. } => {
                assert_eq!(url, "n1/runState");
                assert_eq!(value, Value::Enum("SYNC".to_string()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
