//! Startup configuration: self id, module table, RPC listener addresses,
//! and the initial Cfg to seed Self with.

use crate::node::Node;
use crate::value::Value;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Complete Kraken configuration, loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct KrakenConfig {
    pub self_id: String,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Self's initial Cfg fields, keyed by field name. Values are parsed as
    /// enum symbols unless a field is present in `initial_cfg_ints`/etc —
    /// kept deliberately simple since the store itself is schema-less.
    #[serde(default)]
    pub initial_cfg: BTreeMap<String, String>,
}

/// One entry of the service-module table, populated into the
/// `ServiceManager` at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    #[serde(default = "default_control_buffer")]
    pub control_buffer: usize,
}

fn default_control_buffer() -> usize {
    16
}

/// RPC Gateway listener configuration: a local socket for same-host
/// modules and a network socket for peers.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_uds_path")]
    pub uds_path: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_uds_path() -> String {
    "/var/run/kraken.sock".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:9120".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            uds_path: default_uds_path(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl KrakenConfig {
    /// Builds the `Node` the store seeds Self's Cfg view with, rendering
    /// every `initial_cfg` entry as an `Enum` value (the symbolic form the
    /// wire uses for discrete states; numeric/string fields can still be set
    /// afterward through the normal `SetValue` path).
    pub fn initial_self_node(&self) -> Node {
        let mut node = Node::new(crate::node::NodeId::new(self.self_id.clone()));
        for (field, value) in &self.initial_cfg {
            node.set_field(field.clone(), Value::Enum(value.clone()));
        }
        node
    }
}

/// Loads configuration from a TOML file at `path`.
pub fn load_config(path: &str) -> anyhow::Result<KrakenConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: KrakenConfig = toml::from_str(&contents)?;
    Ok(config)
}
