//! Length-prefixed TCP upstream transport (RFC 1035 §4.2.2).

use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::dns::DnsMessage;
use crate::error::UpstreamError;

use super::{UpstreamDescriptor, UpstreamExchange, UpstreamTransport};

pub struct TcpTransport;

#[async_trait]
impl UpstreamTransport for TcpTransport {
    async fn exchange(
        &self,
        descriptor: &UpstreamDescriptor,
        query: &DnsMessage,
    ) -> Result<UpstreamExchange, UpstreamError> {
        let wire = query
            .to_wire()
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;

        let started = Instant::now();
        let mut stream = timeout(
            descriptor.timeout(),
            TcpStream::connect(&descriptor.address),
        )
        .await
        .map_err(|_| UpstreamError::Timeout)?
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let response = send_and_receive(&mut stream, &wire, descriptor.timeout()).await?;
        Ok(UpstreamExchange {
            response,
            rtt: started.elapsed(),
        })
    }
}

pub(super) async fn send_and_receive(
    stream: &mut (impl AsyncReadExt + AsyncWriteExt + Unpin),
    wire: &[u8],
    deadline: std::time::Duration,
) -> Result<DnsMessage, UpstreamError> {
    let len = wire.len() as u16;
    timeout(deadline, async {
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(wire).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| UpstreamError::Timeout)?
    .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    let mut len_buf = [0u8; 2];
    timeout(deadline, stream.read_exact(&mut len_buf))
        .await
        .map_err(|_| UpstreamError::Timeout)?
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;
    let response_len = u16::from_be_bytes(len_buf) as usize;

    let mut response_buf = vec![0u8; response_len];
    timeout(deadline, stream.read_exact(&mut response_buf))
        .await
        .map_err(|_| UpstreamError::Timeout)?
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    let response =
        DnsMessage::parse(&response_buf).map_err(|e| UpstreamError::Protocol(e.to_string()))?;
    Ok(response)
}
