//! DNS-over-QUIC client transport (RFC 9250). One bidirectional stream per
//! query, length-prefixed the same as DoT/TCP.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Endpoint};
use tokio::time::timeout;
use tokio_rustls::rustls::{ClientConfig as RustlsClientConfig, RootCertStore};

use crate::dns::DnsMessage;
use crate::error::UpstreamError;

use super::{UpstreamDescriptor, UpstreamExchange, UpstreamTransport};

const ALPN_DOQ: &[u8] = b"doq";

pub struct DoqTransport;

fn endpoint() -> Result<Endpoint, UpstreamError> {
    static ENDPOINT: OnceLock<Endpoint> = OnceLock::new();
    if let Some(ep) = ENDPOINT.get() {
        return Ok(ep.clone());
    }

    let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut tls_config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tls_config.alpn_protocols = vec![ALPN_DOQ.to_vec()];

    let quic_config = QuicClientConfig::try_from(tls_config)
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;
    let client_config = ClientConfig::new(Arc::new(quic_config));

    let mut ep = Endpoint::client("0.0.0.0:0".parse().unwrap())
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;
    ep.set_default_client_config(client_config);
    let _ = ENDPOINT.set(ep.clone());
    Ok(ep)
}

#[async_trait]
impl UpstreamTransport for DoqTransport {
    async fn exchange(
        &self,
        descriptor: &UpstreamDescriptor,
        query: &DnsMessage,
    ) -> Result<UpstreamExchange, UpstreamError> {
        let wire = query
            .to_wire()
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;

        let remote = descriptor
            .address
            .parse()
            .map_err(|_| UpstreamError::Transport(format!("invalid DoQ address: {}", descriptor.address)))?;
        let host = descriptor
            .server_name
            .as_deref()
            .unwrap_or_else(|| descriptor.address.rsplit_once(':').map(|(h, _)| h).unwrap_or(&descriptor.address));

        let started = Instant::now();
        let connecting = endpoint()?
            .connect(remote, host)
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let connection = timeout(descriptor.timeout(), connecting)
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let (mut send, mut recv) = timeout(descriptor.timeout(), connection.open_bi())
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let len = wire.len() as u16;
        let mut framed = Vec::with_capacity(wire.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(&wire);
        send.write_all(&framed)
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        send.finish()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let response_buf = timeout(descriptor.timeout(), recv.read_to_end(64 * 1024))
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let rtt = started.elapsed();

        if response_buf.len() < 2 {
            return Err(UpstreamError::Protocol("DoQ response too short".into()));
        }
        let response = DnsMessage::parse(&response_buf[2..])
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;
        Ok(UpstreamExchange { response, rtt })
    }
}
