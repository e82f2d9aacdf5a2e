// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Construction helpers for the common deployment shapes.
//!
//! Each helper returns owned values; constructing twice gives two
//! independent stacks, and teardown is dropping them. There is no hidden
//! global state.

use crate::arbitrator::TransportArbitrator;
use crate::client::ClientManager;
use crate::message::{DynamicMessageBufferFactory, MessageBufferFactory, StaticMessageBufferFactory};
use crate::server::{SimpleServer, StaticServer};
use crate::status::ErpcResult;
use crate::transport::Transport;
use std::sync::Arc;

/// Client with per-message heap buffers.
pub fn basic_client(transport: Arc<dyn Transport>) -> ClientManager {
    ClientManager::new(transport, Arc::new(DynamicMessageBufferFactory::new()))
}

/// Server with per-message heap buffers.
pub fn basic_server(transport: Arc<dyn Transport>) -> SimpleServer {
    SimpleServer::new(transport, Arc::new(DynamicMessageBufferFactory::new()))
}

/// Server over a fixed buffer pool; no allocation after this call.
pub fn static_server(
    transport: Arc<dyn Transport>,
    pool_size: usize,
    buffer_size: usize,
) -> ErpcResult<StaticServer> {
    let factory = StaticMessageBufferFactory::new(pool_size, buffer_size);
    StaticServer::new(transport, &factory)
}

/// One transport carrying both directions: returns the started arbitrator,
/// a client manager on its client side, and a server on its server side.
/// Stop the arbitrator last during teardown.
pub fn arbitrated_client_server(
    transport: Arc<dyn Transport>,
) -> ErpcResult<(Arc<TransportArbitrator>, ClientManager, SimpleServer)> {
    let factory: Arc<dyn MessageBufferFactory> = Arc::new(DynamicMessageBufferFactory::new());
    let arbitrator = Arc::new(TransportArbitrator::new(transport, factory.clone()));
    arbitrator.start()?;
    let client = ClientManager::arbitrated(arbitrator.clone(), factory.clone());
    let server = SimpleServer::new(Arc::new(arbitrator.server_port()), factory);
    client.bind_server(server.context());
    Ok((arbitrator, client, server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeTransport;

    #[test]
    fn helpers_build_independent_stacks() {
        let (a, b) = PipeTransport::pair();
        let _client = basic_client(Arc::new(a));
        let _server = basic_server(Arc::new(b));
    }

    #[test]
    fn arbitrated_helper_wires_nested_context() {
        let (near, _far) = PipeTransport::pair();
        let (arbitrator, _client, server) =
            arbitrated_client_server(Arc::new(near)).expect("setup");
        assert!(!server.context().is_dispatching());
        arbitrator.stop();
    }
}
