//! Plaintext UDP upstream transport (RFC 1035).

use std::time::Instant;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::dns::DnsMessage;
use crate::error::UpstreamError;

use super::{UpstreamDescriptor, UpstreamExchange, UpstreamTransport};

pub struct UdpTransport;

#[async_trait]
impl UpstreamTransport for UdpTransport {
    async fn exchange(
        &self,
        descriptor: &UpstreamDescriptor,
        query: &DnsMessage,
    ) -> Result<UpstreamExchange, UpstreamError> {
        let wire = query
            .to_wire()
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        socket
            .connect(&descriptor.address)
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let started = Instant::now();
        timeout(descriptor.timeout(), socket.send(&wire))
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let mut buf = vec![0u8; 4096];
        let len = timeout(descriptor.timeout(), socket.recv(&mut buf))
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let rtt = started.elapsed();

        trace!(bytes = len, upstream = %descriptor.name, "udp response received");

        let response = DnsMessage::parse(&buf[..len]).map_err(|e| {
            debug!(upstream = %descriptor.name, error = %e, "failed to parse udp response");
            UpstreamError::Protocol(e.to_string())
        })?;

        if response.header.truncated {
            return Err(UpstreamError::Truncated);
        }

        Ok(UpstreamExchange { response, rtt })
    }
}
