//! Client-facing listeners (§4.2): plain TCP, TCP+TLS, WebSocket, WSS.
//!
//! Every listener kind produces the same two things over a shared channel —
//! a freshly accepted [`Session`] and the [`ClientFrame`]s it sends — so
//! everything above this module (Session Manager, Play Dispatcher) is
//! transport-agnostic, matching §4.2's "all subsequent processing is
//! transport-agnostic."

mod tcp;
mod tls;
mod websocket;

pub use tcp::serve_tcp;
pub use tls::serve_tls;
pub use websocket::{serve_websocket, serve_websocket_secure};

// Layer 1: Standard library imports
use std::net::SocketAddr;

// Layer 2: Third-party crate imports
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use playhouse_proto::codec::{ClientFrame, ClientFrameCodec, ServerFrame, ServerFrameCodec};
use playhouse_proto::config::CodecConfig;
use playhouse_proto::ids::SessionId;

use crate::config::TransportConfig;
use crate::session::{OutboundBackpressure, Session, TransportKind};

/// A decoded client frame tagged with the session it arrived on.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub sid: SessionId,
    pub frame: ClientFrame,
}

/// Lifecycle events a listener reports to whatever owns the Session
/// Manager (§4.3). The session-to-stage binding logic lives in
/// `playhouse-rt`; this module only reports raw connection lifecycle.
#[derive(Debug)]
pub enum SessionEvent {
    Connected(Session),
    Frame(InboundFrame),
    Disconnected(SessionId),
}

/// Sender half shared by every listener kind.
pub type SessionEventSender = mpsc::Sender<SessionEvent>;

/// Drive one accepted duplex connection: spawn a reader task that decodes
/// [`ClientFrame`]s and forwards [`SessionEvent`]s, and a writer task that
/// drains the session's bounded outbound queue through [`ServerFrameCodec`].
///
/// Generic over the concrete stream type so TCP and TLS share one
/// implementation (§4.2 "all subsequent processing is transport-agnostic"),
/// grounded on `airssys_osl::executors::network::NetworkExecutor`'s
/// "wrap a tokio primitive, return a typed result" shape, generalized here
/// from a one-shot operation to a long-lived duplex session.
pub async fn run_duplex<S>(
    stream: S,
    remote_addr: SocketAddr,
    transport: TransportKind,
    codec_config: CodecConfig,
    transport_config: &TransportConfig,
    events: SessionEventSender,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(transport_config.outbound_queue_capacity);

    let session = Session::new(remote_addr, transport, outbound_tx, OutboundBackpressure::Error);
    let sid = session.sid();

    if events.send(SessionEvent::Connected(session)).await.is_err() {
        return;
    }

    let mut writer = FramedWrite::new(write_half, ServerFrameCodec::new(codec_config.clone()));
    let writer_task = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(frame) = outbound_rx.recv().await {
            if writer.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut reader = FramedRead::new(read_half, ClientFrameCodec::new(codec_config));
    loop {
        use futures::StreamExt;
        match reader.next().await {
            Some(Ok(frame)) => {
                if events
                    .send(SessionEvent::Frame(InboundFrame { sid, frame }))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(Err(err)) => {
                warn!(sid = sid.as_raw(), error = %err, "frame decode failed, closing session");
                break;
            }
            None => {
                debug!(sid = sid.as_raw(), "peer closed connection");
                break;
            }
        }
    }

    writer_task.abort();
    let _ = events.send(SessionEvent::Disconnected(sid)).await;
}

/// Read exactly one binary WebSocket message's worth of bytes into a
/// [`ClientFrame`], reusing [`ClientFrameCodec`] on a one-shot buffer since
/// WebSocket already preserves message boundaries (§4.2 "no base64").
pub(crate) fn decode_ws_message(
    payload: Vec<u8>,
    codec_config: &CodecConfig,
) -> Result<ClientFrame, playhouse_proto::error::ProtocolError> {
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    let mut codec = ClientFrameCodec::new(codec_config.clone());
    let mut buf = BytesMut::from(&payload[..]);
    match codec.decode(&mut buf)? {
        Some(frame) if buf.is_empty() => Ok(frame),
        Some(_) => Err(playhouse_proto::error::ProtocolError::TruncatedFrame {
            expected: 0,
            actual: buf.len(),
        }),
        None => Err(playhouse_proto::error::ProtocolError::TruncatedFrame {
            expected: payload.len(),
            actual: 0,
        }),
    }
}

/// Encode a [`ServerFrame`] to bytes suitable for a single binary WebSocket
/// message.
pub(crate) fn encode_ws_message(
    frame: ServerFrame,
    codec_config: &CodecConfig,
) -> Result<Vec<u8>, playhouse_proto::error::ProtocolError> {
    use bytes::BytesMut;
    use tokio_util::codec::Encoder;

    let mut codec = ServerFrameCodec::new(codec_config.clone());
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf)?;
    Ok(buf.to_vec())
}
