//! The table of local service-module records the RPC gateway's `ServiceInit`
//! looks up by id, and the control channel the planner uses to drive each
//! one.
//!
//! `DashMap` gives every caller lock-free concurrent access to the table
//! without a reader/writer split around the whole thing, the same registry
//! idiom this crate's stack uses for per-namespace state elsewhere.

use crate::error::{Error, Result};
use crate::node::Node;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

/// A command the planner sends down a service module's control channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceCommand {
    Init(Node),
    Start,
    Stop,
    Update(Node),
}

/// A registered local service module: its id, the channel the planner writes
/// commands to, and the receiving half `ServiceInit` takes ownership of for
/// the lifetime of one gRPC stream.
pub struct ServiceRecord {
    pub id: String,
    control_tx: mpsc::Sender<ServiceCommand>,
    control_rx: Mutex<Option<mpsc::Receiver<ServiceCommand>>>,
}

impl ServiceRecord {
    fn new(id: impl Into<String>, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        ServiceRecord {
            id: id.into(),
            control_tx: tx,
            control_rx: Mutex::new(Some(rx)),
        }
    }

    pub async fn send(&self, cmd: ServiceCommand) -> Result<()> {
        self.control_tx
            .send(cmd)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// `id -> ServiceRecord` table populated at startup from configuration.
#[derive(Default)]
pub struct ServiceManager {
    services: DashMap<String, ServiceRecord>,
}

impl ServiceManager {
    pub fn new() -> Self {
        ServiceManager {
            services: DashMap::new(),
        }
    }

    /// Registers a service module's record, one per configured module id.
    pub fn register(&self, id: impl Into<String>, buffer: usize) {
        let id = id.into();
        info!(service_id = %id, "service registered");
        self.services.insert(id.clone(), ServiceRecord::new(id, buffer));
    }

    pub fn unregister(&self, id: &str) {
        self.services.remove(id);
    }

    /// Looks up a service's control channel sender, failing with
    /// `UnknownService` if no record exists.
    pub fn control_sender(&self, id: &str) -> Result<mpsc::Sender<ServiceCommand>> {
        self.services
            .get(id)
            .map(|r| r.control_tx.clone())
            .ok_or_else(|| Error::UnknownService(id.to_string()))
    }

    /// Takes ownership of a service record's control-channel receiver, for
    /// the duration of one `ServiceInit` stream. `UnknownService` if the id
    /// isn't registered; `Transport` if another stream already holds it.
    pub fn take_receiver(&self, id: &str) -> Result<mpsc::Receiver<ServiceCommand>> {
        let record = self
            .services
            .get(id)
            .ok_or_else(|| Error::UnknownService(id.to_string()))?;
        record
            .control_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Transport(format!("service '{}' already has an active stream", id)))
    }

    /// Returns a receiver once its owning stream ends, so a later
    /// `ServiceInit` call can take it again.
    pub fn return_receiver(&self, id: &str, rx: mpsc::Receiver<ServiceCommand>) {
        if let Some(record) = self.services.get(id) {
            *record.control_rx.lock().unwrap() = Some(rx);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[tokio::test]
    async fn unregistered_service_init_fails_unknown_service() {
        let manager = ServiceManager::new();
        let err = manager.control_sender("svc-a").unwrap_err();
        assert_eq!(err, Error::UnknownService("svc-a".to_string()));
        let err = manager.take_receiver("svc-a").unwrap_err();
        assert_eq!(err, Error::UnknownService("svc-a".to_string()));
    }

    #[tokio::test]
    async fn registered_service_forwards_commands() {
        let manager = ServiceManager::new();
        manager.register("svc-a", 4);

        let tx = manager.control_sender("svc-a").unwrap();
        tx.send(ServiceCommand::Init(Node::new(NodeId::new("self"))))
            .await
            .unwrap();

        let mut rx = manager.take_receiver("svc-a").unwrap();
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ServiceCommand::Init(_)));
    }

    #[tokio::test]
    async fn take_receiver_twice_fails_until_returned() {
        let manager = ServiceManager::new();
        manager.register("svc-a", 4);

        let rx = manager.take_receiver("svc-a").unwrap();
        let err = manager.take_receiver("svc-a").unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        manager.return_receiver("svc-a", rx);
        assert!(manager.take_receiver("svc-a").is_ok());
    }

    #[test]
    fn unregister_removes_record() {
        let manager = ServiceManager::new();
        manager.register("svc-a", 1);
        assert!(manager.contains("svc-a"));
        manager.unregister("svc-a");
        assert!(!manager.contains("svc-a"));
    }
}
