//! Binary WebSocket and WSS listeners (§4.2).
//!
//! WebSocket is message-framed already, so there is no length-prefix
//! framing to layer on top: one binary message carries exactly one
//! [`ClientFrame`]/[`ServerFrame`] payload (§4.2 "no base64, binary frames
//! only").

// Layer 1: Standard library imports
use std::net::SocketAddr;

// Layer 2: Third-party crate imports
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use playhouse_proto::config::CodecConfig;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::session::{OutboundBackpressure, Session, TransportKind};

use super::{decode_ws_message, encode_ws_message, InboundFrame, SessionEvent, SessionEventSender};

/// Drive one accepted WebSocket connection end to end: split the stream,
/// spawn a writer task draining the session's outbound queue, and decode
/// inbound binary messages as they arrive.
async fn run_websocket<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    remote_addr: SocketAddr,
    transport: TransportKind,
    codec_config: CodecConfig,
    transport_config: &TransportConfig,
    events: SessionEventSender,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) =
        tokio::sync::mpsc::channel(transport_config.outbound_queue_capacity);

    let session = Session::new(remote_addr, transport, outbound_tx, OutboundBackpressure::Error);
    let sid = session.sid();

    if events.send(SessionEvent::Connected(session)).await.is_err() {
        return;
    }

    let writer_codec_config = codec_config.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match encode_ws_message(frame, &writer_codec_config) {
                Ok(bytes) => {
                    if ws_sink.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(sid = sid.as_raw(), error = %err, "failed to encode outbound frame");
                    break;
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    loop {
        match ws_source.next().await {
            Some(Ok(Message::Binary(payload))) => match decode_ws_message(payload, &codec_config) {
                Ok(frame) => {
                    if events
                        .send(SessionEvent::Frame(InboundFrame { sid, frame }))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    warn!(sid = sid.as_raw(), error = %err, "websocket frame decode failed");
                    break;
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                debug!(sid = sid.as_raw(), "websocket closed by peer");
                break;
            }
            Some(Ok(_)) => continue, // ping/pong/text, ignored per §4.2 (binary-only protocol)
            Some(Err(err)) => {
                warn!(sid = sid.as_raw(), error = %err, "websocket transport error");
                break;
            }
        }
    }

    writer_task.abort();
    let _ = events.send(SessionEvent::Disconnected(sid)).await;
}

/// Accept plain-TCP WebSocket upgrades on `bind_addr` forever.
pub async fn serve_websocket(
    bind_addr: SocketAddr,
    codec_config: CodecConfig,
    transport_config: TransportConfig,
    events: SessionEventSender,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "websocket listener started");

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "websocket accept failed");
                continue;
            }
        };

        let codec_config = codec_config.clone();
        let transport_config = transport_config.clone();
        let events = events.clone();

        tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(error = %err, %remote_addr, "websocket upgrade failed");
                    return;
                }
            };

            run_websocket(
                ws_stream,
                remote_addr,
                TransportKind::WebSocket,
                codec_config,
                &transport_config,
                events,
            )
            .await;
        });
    }
}

/// Accept TLS-wrapped WebSocket (WSS) upgrades on `bind_addr` forever.
pub async fn serve_websocket_secure(
    bind_addr: SocketAddr,
    acceptor: TlsAcceptor,
    codec_config: CodecConfig,
    transport_config: TransportConfig,
    events: SessionEventSender,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "wss listener started");

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "wss accept failed");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let codec_config = codec_config.clone();
        let transport_config = transport_config.clone();
        let events = events.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, %remote_addr, "wss tls handshake failed");
                    return;
                }
            };

            let ws_stream = match tokio_tungstenite::accept_async(tls_stream).await {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(error = %err, %remote_addr, "wss upgrade failed");
                    return;
                }
            };

            run_websocket(
                ws_stream,
                remote_addr,
                TransportKind::WebSocketSecure,
                codec_config,
                &transport_config,
                events,
            )
            .await;
        });
    }
}
