use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use kraken_core::config::{self, KrakenConfig};
use kraken_core::event::EventBus;
use kraken_core::graph::StaticPlanner;
use kraken_core::node::NodeId;
use kraken_core::query::QueryEngine;
use kraken_core::rpc::{self, KrakenService};
use kraken_core::service::ServiceManager;
use kraken_core::store::NodeStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kraken_core=info".into()),
        )
        .init();

    info!("Kraken starting...");

    let config_path = std::env::var("KRAKEN_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config: KrakenConfig = config::load_config(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %config_path, "failed to load config, using a bare self-only default");
        KrakenConfig {
            self_id: "self".to_string(),
            modules: Vec::new(),
            rpc: Default::default(),
            initial_cfg: Default::default(),
        }
    });

    let bus = EventBus::spawn();
    let store = NodeStore::new(NodeId::new(config.self_id.clone()), bus.clone());
    store.seed_self_cfg(config.initial_self_node()).await;
    info!(self_id = %config.self_id, "node store initialized");

    // No planner integration is wired up yet — this core only consumes a
    // planner's graph, it doesn't run one — so the gateway serves an empty
    // mutation graph until a real planner is attached.
    let planner = Arc::new(StaticPlanner::new(vec![], vec![]));
    let query = QueryEngine::new(store, bus, planner);

    let services = Arc::new(ServiceManager::new());
    for module in &config.modules {
        services.register(module.id.clone(), module.control_buffer);
        info!(module = %module.id, "service module registered");
    }

    let service = KrakenService::new(query, services);
    rpc::serve(&config.rpc, service).await
}
