//! Plain TCP listener (§4.2).

// Layer 1: Standard library imports
use std::net::SocketAddr;

// Layer 2: Third-party crate imports
use tokio::net::TcpListener;
use tracing::{info, warn};

// Layer 3: Internal module imports
use playhouse_proto::config::CodecConfig;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::session::TransportKind;

use super::{run_duplex, SessionEventSender};

/// Accept plain TCP connections on `bind_addr` forever, spawning one
/// [`run_duplex`] task per accepted socket. Returns only if the listening
/// socket itself fails to bind; per-connection errors are logged and do not
/// bring the listener down (§4.2 "a misbehaving client is just one more
/// closed session").
pub async fn serve_tcp(
    bind_addr: SocketAddr,
    codec_config: CodecConfig,
    transport_config: TransportConfig,
    events: SessionEventSender,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "tcp listener started");

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "tcp accept failed");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!(error = %err, "failed to set TCP_NODELAY");
        }

        let codec_config = codec_config.clone();
        let transport_config = transport_config.clone();
        let events = events.clone();
        tokio::spawn(async move {
            run_duplex(
                stream,
                remote_addr,
                TransportKind::Tcp,
                codec_config,
                &transport_config,
                events,
            )
            .await;
        });
    }
}
