//! RPC Gateway: the `Kraken` gRPC service, bound concurrently on a Unix
//! socket (same-host service modules) and a TCP socket (peers).

pub mod convert;
pub mod deadline;
pub mod service;
pub mod stream;

pub mod pb {
    tonic::include_proto!("kraken");
}

pub use service::KrakenService;

use std::path::Path;

use anyhow::Context;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::config::RpcConfig;
use deadline::DeadlineInterceptor;

/// Binds both listeners and runs the gateway until either one fails.
pub async fn serve(config: &RpcConfig, service: KrakenService) -> anyhow::Result<()> {
    let uds_path = Path::new(&config.uds_path);
    if uds_path.exists() {
        std::fs::remove_file(uds_path)
            .with_context(|| format!("removing stale socket at {}", config.uds_path))?;
    }
    let uds_listener = UnixListener::bind(uds_path)
        .with_context(|| format!("binding unix socket at {}", config.uds_path))?;
    let uds_incoming = UnixListenerStream::new(uds_listener);

    let tcp_addr = config
        .listen_addr
        .parse()
        .with_context(|| format!("parsing listen address {}", config.listen_addr))?;

    info!(uds = %config.uds_path, tcp = %config.listen_addr, "RPC gateway listening");

    let uds_server = Server::builder()
        .add_service(pb::kraken_server::KrakenServer::with_interceptor(
            service.clone(),
            DeadlineInterceptor,
        ))
        .serve_with_incoming(uds_incoming);

    let tcp_server = Server::builder()
        .add_service(pb::kraken_server::KrakenServer::with_interceptor(
            service,
            DeadlineInterceptor,
        ))
        .serve(tcp_addr);

    tokio::try_join!(
        async { uds_server.await.context("unix socket server") },
        async { tcp_server.await.context("tcp server") },
    )?;
    Ok(())
}
