//! DNS-over-TLS client transport (RFC 7858). TLS 1.3 minimum, SNI from the
//! upstream's configured server name or its host component.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::dns::DnsMessage;
use crate::error::UpstreamError;

use super::tcp::send_and_receive;
use super::{UpstreamDescriptor, UpstreamExchange, UpstreamTransport};

pub struct DotTransport;

fn client_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = ClientConfig::builder_with_protocol_versions(&[
                &tokio_rustls::rustls::version::TLS13,
            ])
            .with_root_certificates(roots)
            .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

#[async_trait]
impl UpstreamTransport for DotTransport {
    async fn exchange(
        &self,
        descriptor: &UpstreamDescriptor,
        query: &DnsMessage,
    ) -> Result<UpstreamExchange, UpstreamError> {
        let wire = query
            .to_wire()
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;

        let host = descriptor
            .server_name
            .clone()
            .or_else(|| descriptor.address.rsplit_once(':').map(|(h, _)| h.to_string()))
            .unwrap_or_else(|| descriptor.address.clone());
        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| UpstreamError::Transport(format!("invalid TLS server name: {host}")))?;

        let started = Instant::now();
        let tcp = timeout(
            descriptor.timeout(),
            TcpStream::connect(&descriptor.address),
        )
        .await
        .map_err(|_| UpstreamError::Timeout)?
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let connector = TlsConnector::from(client_config());
        let mut tls = timeout(descriptor.timeout(), connector.connect(server_name, tcp))
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let response = send_and_receive(&mut tls, &wire, descriptor.timeout()).await?;
        Ok(UpstreamExchange {
            response,
            rtt: started.elapsed(),
        })
    }
}
