//! In-memory network doubles for tests
//!
//! A loopback fabric that routes requests straight into registered handlers,
//! plus a recording gossip publisher. Wire behavior (encode, dispatch,
//! decode) is identical to a real transport minus the sockets.

use crate::transport::{GossipPublisher, RequestTransport};
use crate::{NetworkError, NetworkResult};
use async_trait::async_trait;
use lib_routing::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Inbound dispatch surface a node registers on the fabric
#[async_trait]
pub trait InboundRpc: Send + Sync {
    async fn handle(&self, from: PeerId, protocol: &str, body: &[u8]) -> NetworkResult<Vec<u8>>;
}

/// Shared in-memory fabric connecting test nodes
#[derive(Default)]
pub struct LoopbackFabric {
    nodes: RwLock<HashMap<PeerId, Arc<dyn InboundRpc>>>,
}

impl LoopbackFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node's inbound handler
    pub fn register(&self, peer: PeerId, handler: Arc<dyn InboundRpc>) {
        self.nodes.write().insert(peer, handler);
    }

    /// Remove a node (simulates an unreachable peer)
    pub fn disconnect(&self, peer: &PeerId) {
        self.nodes.write().remove(peer);
    }

    /// A transport endpoint sending as `from`
    pub fn transport_for(self: &Arc<Self>, from: PeerId) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            fabric: Arc::clone(self),
            from,
        })
    }
}

/// Request transport bound to one sender on the fabric
pub struct LoopbackTransport {
    fabric: Arc<LoopbackFabric>,
    from: PeerId,
}

#[async_trait]
impl RequestTransport for LoopbackTransport {
    async fn request(
        &self,
        peer: &PeerId,
        protocol: &str,
        body: Vec<u8>,
    ) -> NetworkResult<Vec<u8>> {
        let handler = self
            .fabric
            .nodes
            .read()
            .get(peer)
            .cloned()
            .ok_or(NetworkError::PeerUnreachable(*peer))?;
        handler.handle(self.from, protocol, &body).await
    }
}

/// Gossip publisher that records every publish
#[derive(Default)]
pub struct RecordingGossip {
    published: RwLock<Vec<(String, Vec<u8>)>>,
}

impl RecordingGossip {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.read().clone()
    }

    pub fn count(&self) -> usize {
        self.published.read().len()
    }
}

#[async_trait]
impl GossipPublisher for RecordingGossip {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> NetworkResult<()> {
        self.published.write().push((topic.to_string(), body));
        Ok(())
    }
}
