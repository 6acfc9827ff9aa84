//! The `Kraken` gRPC service: unary CRUD/mutation-graph handlers thin
//! enough to read as pure dispatch, plus the five long-lived streams
//! service modules and peers attach to.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::event::{chan_sender, Event, EventType};
use crate::node::{Node, NodeId};
use crate::query::QueryEngine;
use crate::service::{ServiceCommand, ServiceManager};
use crate::url::Url;

use super::convert::{
    event_to_pb, graph_edge_to_pb, graph_node_to_pb, mutation_kind_to_pb, mutation_path_to_pb,
    node_to_pb, pb_to_node,
};
use super::deadline::check_deadline;
use super::pb;
use super::stream::GatewayStream;

/// Holds a service record's control-channel receiver for the lifetime of one
/// `ServiceInit` stream and hands it back to the [`ServiceManager`] the
/// moment the stream is dropped, whether that's an orderly close or the
/// client going away mid-stream.
struct ReceiverGuard {
    manager: Arc<ServiceManager>,
    id: String,
    rx: Option<mpsc::Receiver<ServiceCommand>>,
}

impl ReceiverGuard {
    fn new(manager: Arc<ServiceManager>, id: String, rx: mpsc::Receiver<ServiceCommand>) -> Self {
        ReceiverGuard {
            manager,
            id,
            rx: Some(rx),
        }
    }

    async fn recv(&mut self) -> Option<ServiceCommand> {
        self.rx.as_mut().expect("ReceiverGuard used after drop").recv().await
    }
}

impl Drop for ReceiverGuard {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.manager.return_receiver(&self.id, rx);
        }
    }
}

fn service_command_to_pb(cmd: ServiceCommand) -> pb::ServiceControl {
    use pb::service_control::Command;
    match cmd {
        ServiceCommand::Init(node) => pb::ServiceControl {
            command: Command::Init as i32,
            config: Some(node_to_pb(&node)),
        },
        ServiceCommand::Start => pb::ServiceControl {
            command: Command::Start as i32,
            config: None,
        },
        ServiceCommand::Stop => pb::ServiceControl {
            command: Command::Stop as i32,
            config: None,
        },
        ServiceCommand::Update(node) => pb::ServiceControl {
            command: Command::Update as i32,
            config: Some(node_to_pb(&node)),
        },
    }
}

fn node_query_response(node: Node) -> pb::Query {
    pb::Query {
        url: node.id.to_string(),
        payload: Some(pb::query::Payload::Node(node_to_pb(&node))),
    }
}

fn nodes_to_query_multi(nodes: Vec<Node>) -> pb::QueryMulti {
    pb::QueryMulti {
        queries: nodes.into_iter().map(node_query_response).collect(),
    }
}

fn bool_query(value: bool) -> pb::Query {
    pb::Query {
        url: String::new(),
        payload: Some(pb::query::Payload::BoolValue(value)),
    }
}

fn node_id_from_url(url: &str) -> Result<NodeId, Status> {
    Ok(NodeId::from_url(&Url::parse(url)?))
}

fn require_node(payload: Option<pb::query::Payload>, rpc: &str) -> Result<Node, Status> {
    match payload {
        Some(pb::query::Payload::Node(n)) => Ok(pb_to_node(n)?),
        _ => Err(Status::invalid_argument(format!("{rpc} requires a node payload"))),
    }
}

/// Shared handle to the Query Engine and the local service module table.
/// Cheap to clone — `tonic`'s generated server wraps this once per
/// connection, not once per request.
#[derive(Clone)]
pub struct KrakenService {
    query: QueryEngine,
    services: Arc<ServiceManager>,
}

impl KrakenService {
    pub fn new(query: QueryEngine, services: Arc<ServiceManager>) -> Self {
        KrakenService { query, services }
    }
}

#[tonic::async_trait]
impl pb::kraken_server::Kraken for KrakenService {
    type ServiceInitStream = GatewayStream<pb::ServiceControl>;
    type MutationInitStream = GatewayStream<pb::MutationControl>;
    type EventInitStream = GatewayStream<pb::EventControl>;

    async fn query_create(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let node = require_node(request.into_inner().payload, "QueryCreate")?;
        let created = self.query.create(node).await?;
        Ok(Response::new(node_query_response(created)))
    }

    async fn query_read(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let id = node_id_from_url(&request.into_inner().url)?;
        let node = self.query.read(&id).await?;
        Ok(Response::new(node_query_response(node)))
    }

    async fn query_read_dsc(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let id = node_id_from_url(&request.into_inner().url)?;
        let node = self.query.read_dsc(&id).await?;
        Ok(Response::new(node_query_response(node)))
    }

    async fn query_update(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let node = require_node(request.into_inner().payload, "QueryUpdate")?;
        let (merged, _diff) = self.query.update(node).await?;
        Ok(Response::new(node_query_response(merged)))
    }

    async fn query_update_dsc(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let node = require_node(request.into_inner().payload, "QueryUpdateDsc")?;
        let (merged, _diff) = self.query.update_dsc(node).await?;
        Ok(Response::new(node_query_response(merged)))
    }

    async fn query_delete(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let id = node_id_from_url(&request.into_inner().url)?;
        let removed = self.query.delete(&id).await?;
        Ok(Response::new(node_query_response(removed)))
    }

    async fn query_read_all(&self, request: Request<pb::Empty>) -> Result<Response<pb::QueryMulti>, Status> {
        check_deadline(&request)?;
        Ok(Response::new(nodes_to_query_multi(self.query.read_all().await)))
    }

    async fn query_read_all_dsc(&self, request: Request<pb::Empty>) -> Result<Response<pb::QueryMulti>, Status> {
        check_deadline(&request)?;
        Ok(Response::new(nodes_to_query_multi(self.query.read_all_dsc().await)))
    }

    async fn query_delete_all(&self, request: Request<pb::Empty>) -> Result<Response<pb::QueryMulti>, Status> {
        check_deadline(&request)?;
        let removed = self.query.delete_all().await?;
        Ok(Response::new(nodes_to_query_multi(removed)))
    }

    async fn query_freeze(&self, request: Request<pb::Empty>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        self.query.freeze();
        Ok(Response::new(bool_query(self.query.frozen())))
    }

    async fn query_thaw(&self, request: Request<pb::Empty>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        self.query.thaw();
        Ok(Response::new(bool_query(self.query.frozen())))
    }

    async fn query_frozen(&self, request: Request<pb::Empty>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        Ok(Response::new(bool_query(self.query.frozen())))
    }

    async fn query_mutation_nodes(&self, request: Request<pb::Empty>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let nodes = self.query.read_mutation_nodes("/graph/nodes");
        Ok(Response::new(pb::Query {
            url: "/graph/nodes".to_string(),
            payload: Some(pb::query::Payload::MutationNodeList(pb::MutationNodeList {
                nodes: nodes.iter().map(graph_node_to_pb).collect(),
            })),
        }))
    }

    // Intentionally queries the planner with "/graph/nodes" rather than
    // "/graph/edges" here, matching the long-standing behavior of this RPC.
    // Left as-is rather than silently corrected.
    async fn query_mutation_edges(&self, request: Request<pb::Empty>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let edges = self.query.read_mutation_edges("/graph/nodes");
        Ok(Response::new(pb::Query {
            url: "/graph/edges".to_string(),
            payload: Some(pb::query::Payload::MutationEdgeList(pb::MutationEdgeList {
                edges: edges.iter().map(graph_edge_to_pb).collect(),
            })),
        }))
    }

    async fn query_node_mutation_nodes(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let url = request.into_inner().url;
        let nodes = self.query.read_node_mutation_nodes(&url)?;
        Ok(Response::new(pb::Query {
            url,
            payload: Some(pb::query::Payload::MutationNodeList(pb::MutationNodeList {
                nodes: nodes.iter().map(graph_node_to_pb).collect(),
            })),
        }))
    }

    async fn query_node_mutation_edges(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let url = request.into_inner().url;
        let edges = self.query.read_node_mutation_edges(&url)?;
        Ok(Response::new(pb::Query {
            url,
            payload: Some(pb::query::Payload::MutationEdgeList(pb::MutationEdgeList {
                edges: edges.iter().map(graph_edge_to_pb).collect(),
            })),
        }))
    }

    async fn query_node_mutation_path(&self, request: Request<pb::Query>) -> Result<Response<pb::Query>, Status> {
        check_deadline(&request)?;
        let url = request.into_inner().url;
        let path = self.query.read_node_mutation_path(&url)?;
        Ok(Response::new(pb::Query {
            url,
            payload: Some(pb::query::Payload::MutationPath(mutation_path_to_pb(&path))),
        }))
    }

    async fn service_init(
        &self,
        request: Request<pb::ServiceInitRequest>,
    ) -> Result<Response<Self::ServiceInitStream>, Status> {
        let id = request.into_inner().id;
        let rx = self.services.take_receiver(&id)?;
        let self_node = self.query.read(self.query.self_id()).await?;
        let mut guard = ReceiverGuard::new(Arc::clone(&self.services), id.clone(), rx);

        let stream = stream! {
            yield Ok(pb::ServiceControl {
                command: pb::service_control::Command::Init as i32,
                config: Some(node_to_pb(&self_node)),
            });
            while let Some(cmd) = guard.recv().await {
                yield Ok(service_command_to_pb(cmd));
            }
        };
        Ok(Response::new(GatewayStream::new(stream, move || {
            info!(service_id = %id, "ServiceInit stream closed");
        })))
    }

    async fn mutation_init(
        &self,
        request: Request<pb::ServiceInitRequest>,
    ) -> Result<Response<Self::MutationInitStream>, Status> {
        let module = request.into_inner().id;
        // Distinct streams for the same module id must get distinct
        // subscriber ids, or the second Subscribe would silently evict the
        // first listener (the dispatcher dedups by id on (re)subscribe).
        let label = format!("MutationInit:{module}:{}", Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(32);
        let bus = self.query.bus().clone();
        let filter_module = module.clone();
        bus.subscribe_fn(
            label.clone(),
            EventType::Mutation,
            move |ev| ev.mutation_module_id() == Some(filter_module.as_str()),
            move |ev| chan_sender(ev, &tx),
        )
        .await;

        let stream = stream! {
            while let Some(event) = rx.recv().await {
                if let Event::Mutation { module_id, mutation_id, kind, node_cfg, node_dsc } = event {
                    yield Ok(pb::MutationControl {
                        module: module_id,
                        id: mutation_id,
                        r#type: mutation_kind_to_pb(kind),
                        cfg: Some(node_to_pb(&node_cfg)),
                        dsc: Some(node_to_pb(&node_dsc)),
                    });
                }
            }
        };
        let cleanup_bus = bus.clone();
        Ok(Response::new(GatewayStream::new(stream, move || {
            cleanup_bus.unsubscribe(label);
        })))
    }

    async fn event_init(
        &self,
        request: Request<pb::ServiceInitRequest>,
    ) -> Result<Response<Self::EventInitStream>, Status> {
        let module = request.into_inner().module;
        let label = format!("EventInit:{module}:{}", Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(32);
        let bus = self.query.bus().clone();
        bus.subscribe_fn(label.clone(), EventType::All, |_| true, move |ev| chan_sender(ev, &tx))
            .await;

        let stream = stream! {
            while let Some(event) = rx.recv().await {
                match event_to_pb(&event) {
                    Some(control) => yield Ok(control),
                    None => warn!("EventInit: unrecognized event kind, skipping"),
                }
            }
        };
        let cleanup_bus = bus.clone();
        Ok(Response::new(GatewayStream::new(stream, move || {
            cleanup_bus.unsubscribe(label);
        })))
    }

    async fn discovery_init(
        &self,
        request: Request<Streaming<pb::DiscoveryControl>>,
    ) -> Result<Response<pb::Empty>, Status> {
        let mut incoming = request.into_inner();
        let bus = self.query.bus().clone();
        while let Some(msg) = incoming.next().await {
            let msg = msg?;
            bus.emit_one(Event::discovery(msg.id, msg.url, msg.value_id));
        }
        Ok(Response::new(pb::Empty {}))
    }

    async fn logger_init(
        &self,
        request: Request<Streaming<pb::LogMessage>>,
    ) -> Result<Response<pb::Empty>, Status> {
        let mut incoming = request.into_inner();
        while let Some(msg) = incoming.next().await {
            let msg = msg?;
            match msg.level.to_lowercase().as_str() {
                "trace" => trace!(origin = %msg.origin, "{}", msg.msg),
                "debug" => debug!(origin = %msg.origin, "{}", msg.msg),
                "warn" => warn!(origin = %msg.origin, "{}", msg.msg),
                "error" => error!(origin = %msg.origin, "{}", msg.msg),
                _ => info!(origin = %msg.origin, "{}", msg.msg),
            }
        }
        Ok(Response::new(pb::Empty {}))
    }
}
