//! TCP+TLS listener (§4.2).

// Layer 1: Standard library imports
use std::net::SocketAddr;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use rustls_pemfile::{certs, private_key};
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

// Layer 3: Internal module imports
use playhouse_proto::config::CodecConfig;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::session::TransportKind;

use super::{run_duplex, SessionEventSender};

/// Build a [`TlsAcceptor`] from a PEM certificate chain and private key,
/// built from caller-supplied configuration rather than reaching for
/// globals.
pub fn build_acceptor(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, TransportError> {
    let cert_chain = certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TransportError::Tls(format!("invalid certificate chain: {err}")))?;

    let private_key = private_key(&mut &key_pem[..])
        .map_err(|err| TransportError::Tls(format!("invalid private key: {err}")))?
        .ok_or_else(|| TransportError::Tls("no private key found in PEM input".to_string()))?;

    let server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|err| TransportError::Tls(err.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Accept TLS-wrapped TCP connections on `bind_addr` forever. The TLS
/// handshake runs before the connection is handed to [`run_duplex`]; a
/// failed handshake closes the socket without ever producing a `Session`.
pub async fn serve_tls(
    bind_addr: SocketAddr,
    acceptor: TlsAcceptor,
    codec_config: CodecConfig,
    transport_config: TransportConfig,
    events: SessionEventSender,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "tls listener started");

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "tls accept failed");
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
                    warn!(error = %err, %remote_addr, "tls handshake failed");
                    return;
                }
            };

            run_duplex(
                tls_stream,
                remote_addr,
                TransportKind::Tls,
                codec_config,
                &transport_config,
                events,
            )
            .await;
        });
    }
}
