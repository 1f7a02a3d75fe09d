//! Mesh transport (§4.5): a duplex connection per peer node, addressed by
//! node-id.

mod backoff;
mod link;

pub use backoff::ReconnectBackoff;
pub use link::{spawn_mesh_link, MeshLink};

// Layer 1: Standard library imports
use std::net::SocketAddr;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use playhouse_proto::codec::MeshFrame;
use playhouse_proto::config::CodecConfig;
use playhouse_proto::ids::NodeId;

use crate::config::MeshConfig;
use crate::error::TransportError;

/// Directory of live outbound [`MeshLink`]s, keyed by peer `nodeId`
/// (§4.5). Grounded on the same `DashMap`-registry shape as
/// `crate::session::SessionRegistry` and `crate::server_info::ServerInfoCenter`.
#[derive(Default)]
pub struct MeshHub {
    links: DashMap<NodeId, MeshLink>,
}

impl MeshHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dial (or redial) `node_id` at `addr`, replacing any existing link.
    /// Inbound frames from this peer are forwarded onto `inbound`.
    pub fn connect(
        &self,
        node_id: NodeId,
        addr: SocketAddr,
        codec_config: CodecConfig,
        mesh_config: MeshConfig,
        inbound: mpsc::Sender<MeshFrame>,
    ) -> MeshLink {
        let link = spawn_mesh_link(node_id.clone(), addr, codec_config, mesh_config, inbound);
        self.links.insert(node_id, link.clone());
        link
    }

    /// Register an already-running link (e.g. the server side of an
    /// inbound mesh connection this process accepted rather than dialed).
    pub fn register(&self, link: MeshLink) {
        self.links.insert(link.node_id().clone(), link);
    }

    pub fn get(&self, node_id: &NodeId) -> Option<MeshLink> {
        self.links.get(node_id).map(|entry| entry.value().clone())
    }

    /// Send a frame to `node_id` (§4.5 `send(nodeId, routePacket)`).
    pub async fn send(&self, node_id: &NodeId, frame: MeshFrame) -> Result<(), TransportError> {
        let link = self
            .get(node_id)
            .ok_or_else(|| TransportError::PeerUnreachable(node_id.clone()))?;
        link.send(frame).await
    }

    pub fn remove(&self, node_id: &NodeId) {
        self.links.remove(node_id);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
