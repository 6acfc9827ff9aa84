// Crate-wide error kind
pub mod error;

// Addressable scalar/structured values
pub mod value;

// URL grammar over node field paths
pub mod url;

// Node identity and the per-node record
pub mod node;

// Dual-view node store
pub mod store;

// Typed pub/sub event bus
pub mod event;

// Mutation graph view over the planner
pub mod graph;

// Query Engine: CRUD + mutation-graph reads
pub mod query;

// Service module lifecycle table
pub mod service;

// Startup configuration
pub mod config;

// gRPC gateway
pub mod rpc;
