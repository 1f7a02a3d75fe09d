//! One duplex connection to a peer node, reconnecting with backoff (§4.5).

// Layer 1: Standard library imports
use std::net::SocketAddr;

// Layer 2: Third-party crate imports
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use playhouse_proto::codec::{MeshFrame, MeshFrameCodec};
use playhouse_proto::config::CodecConfig;
use playhouse_proto::ids::NodeId;

use crate::config::MeshConfig;
use crate::error::TransportError;

use super::backoff::ReconnectBackoff;

/// A handle to a peer node's outbound send queue (§4.5 "a dropped link is
/// retried, not surfaced to callers").
#[derive(Clone)]
pub struct MeshLink {
    node_id: NodeId,
    outbound: mpsc::Sender<MeshFrame>,
}

impl MeshLink {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Enqueue a frame for delivery to this peer. Fails only once the link's
    /// background task has given up, which currently never happens — it
    /// reconnects indefinitely (§4.5) — so this surfaces only if the link
    /// was explicitly torn down.
    pub async fn send(&self, frame: MeshFrame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::PeerUnreachable(self.node_id.clone()))
    }
}

/// Spawn a [`MeshLink`] that dials `addr` and keeps the connection alive,
/// forwarding every inbound [`MeshFrame`] onto `inbound` and reconnecting
/// with [`ReconnectBackoff`] on any I/O failure. Runs until the process
/// exits or the returned link is dropped and its queue drains.
///
/// A restart-then-backoff loop shape adapted to a network reconnect loop
/// that never gives up, rather than one bounded by a rate-limit window.
pub fn spawn_mesh_link(
    node_id: NodeId,
    addr: SocketAddr,
    codec_config: CodecConfig,
    mesh_config: MeshConfig,
    inbound: mpsc::Sender<MeshFrame>,
) -> MeshLink {
    let (outbound_tx, outbound_rx) = mpsc::channel(mesh_config.send_queue_capacity);
    let link = MeshLink {
        node_id: node_id.clone(),
        outbound: outbound_tx,
    };

    tokio::spawn(run_link(node_id, addr, codec_config, mesh_config, inbound, outbound_rx));

    link
}

async fn run_link(
    node_id: NodeId,
    addr: SocketAddr,
    codec_config: CodecConfig,
    mesh_config: MeshConfig,
    inbound: mpsc::Sender<MeshFrame>,
    mut outbound_rx: mpsc::Receiver<MeshFrame>,
) {
    let mut backoff = ReconnectBackoff::new(mesh_config.backoff_base, mesh_config.backoff_max);

    loop {
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(%node_id, %addr, error = %err, attempt = backoff.attempt(), ?delay, "mesh link connect failed, retrying");
                sleep(delay).await;
                continue;
            }
        };

        info!(%node_id, %addr, "mesh link connected");
        backoff.reset();

        let mut framed = Framed::new(stream, MeshFrameCodec::new(codec_config.clone()));

        loop {
            tokio::select! {
                incoming = framed.next() => match incoming {
                    Some(Ok(frame)) => {
                        if inbound.send(frame).await.is_err() {
                            debug!(%node_id, "inbound sink closed, stopping mesh link");
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%node_id, error = %err, "mesh link decode failed");
                        break;
                    }
                    None => {
                        warn!(%node_id, "mesh link closed by peer");
                        break;
                    }
                },
                outgoing = outbound_rx.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(err) = framed.send(frame).await {
                            warn!(%node_id, error = %err, "mesh link send failed");
                            break;
                        }
                    }
                    None => {
                        debug!(%node_id, "outbound queue closed, stopping mesh link");
                        return;
                    }
                },
            }
        }

        let delay = backoff.next_delay();
        warn!(%node_id, attempt = backoff.attempt(), ?delay, "mesh link lost, reconnecting");
        sleep(delay).await;
    }
}
