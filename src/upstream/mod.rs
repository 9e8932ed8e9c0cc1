//! Upstream transports: the leaf stage that actually puts a query on the
//! wire to a configured resolver (spec §4.1, §6.2).

pub mod addr;
pub mod dot;
pub mod doh;
pub mod doq;
pub mod tcp;
pub mod udp;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dns::DnsMessage;
use crate::error::UpstreamError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
    Dot,
    Doh,
    Doq,
}

/// Configuration for a single upstream resolver, as accepted by
/// `DnsCore::set_upstreams` (spec §6.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamDescriptor {
    pub name: String,
    pub address: String,
    pub transport: Option<Transport>,
    /// Chain ordering weight (spec §4.2 "Weight"); lower sorts first, ties
    /// broken by insertion order.
    pub weight: i32,
    /// `0` means "use the per-transport default" (spec §4.1: 2 s for
    /// UDP/TCP, 5 s for DoT/DoH/DoQ).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// TLS/HTTPS server name, required for DoT/DoH/DoQ when the address is a
    /// bare IP (spec §6.2).
    pub server_name: Option<String>,
}

fn default_timeout_ms() -> u64 {
    0
}

impl UpstreamDescriptor {
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms > 0 {
            return Duration::from_millis(self.timeout_ms);
        }
        let default_ms = match self.transport.unwrap_or_default() {
            Transport::Dot | Transport::Doh | Transport::Doq => 5_000,
            Transport::Udp | Transport::Tcp => 2_000,
        };
        Duration::from_millis(default_ms)
    }
}

/// A single forwarding attempt's outcome: the raw wire answer plus the RTT,
/// so the chain stage and metrics wrapper can attribute timing without
/// re-measuring.
#[derive(Debug)]
pub struct UpstreamExchange {
    pub response: DnsMessage,
    pub rtt: Duration,
}

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn exchange(
        &self,
        descriptor: &UpstreamDescriptor,
        query: &DnsMessage,
    ) -> Result<UpstreamExchange, UpstreamError>;
}

/// Resolves a descriptor's declared transport to its implementation. Kept as
/// a free function rather than a registry struct since the set of
/// transports is fixed at compile time (spec Non-goals: no pluggable
/// transport loading).
pub fn transport_for(transport: Transport) -> &'static dyn UpstreamTransport {
    match transport {
        Transport::Udp => &udp::UdpTransport,
        Transport::Tcp => &tcp::TcpTransport,
        Transport::Dot => &dot::DotTransport,
        Transport::Doh => &doh::DohTransport,
        Transport::Doq => &doq::DoqTransport,
    }
}
