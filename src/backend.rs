//! The firewall/marking backend the mark post-processor drives. The
//! concrete implementation is an external collaborator; this crate only
//! defines the interface it calls against (spec §1 "Out of scope").

use async_trait::async_trait;
use std::net::IpAddr;

/// Tags `ip` for egress via `iface` for `ttl` seconds. Implementations talk
/// to whatever firewall/routing subsystem actually exists on the host; this
/// crate never assumes one.
#[async_trait]
pub trait MarkBackend: Send + Sync {
    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: u32) -> Result<(), MarkError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("mark backend error: {0}")]
pub struct MarkError(pub String);

/// A `MarkBackend` that only logs (SPEC_FULL.md §1: the concrete firewall
/// backend is an external collaborator this crate never implements). Used
/// as the standalone binary's default so the mark pipeline stage has
/// somewhere to route to without pulling in a real netlink/nftables
/// dependency the spec explicitly places out of scope.
pub struct LoggingMarkBackend;

#[async_trait]
impl MarkBackend for LoggingMarkBackend {
    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: u32) -> Result<(), MarkError> {
        tracing::info!(iface, %ip, ttl, "mark (no firewall backend configured, logging only)");
        Ok(())
    }
}
