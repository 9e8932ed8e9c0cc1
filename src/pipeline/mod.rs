//! The resolver pipeline: a chain of decorator stages sharing one contract
//! (spec §2). The active pipeline is built bottom-up by `crate::managers`
//! and swapped in atomically on reconfiguration.

pub mod cache;
pub mod chain;
pub mod hosts;
pub mod mark;
pub mod metrics_stage;
pub mod stale;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dns::DnsMessage;
use crate::error::Result;

/// Short string naming the stage or upstream that produced a response
/// (`"cache"`, `"hosts"`, `"udp:1.1.1.1:53"`, …) — spec §2/Glossary.
pub type SourceTag = String;

/// Per-request context threaded through every stage. Stages that don't need
/// a field simply ignore it; this mirrors the teacher's single-context
/// convention in `resolver.rs` rather than growing a bespoke struct per
/// stage.
#[derive(Clone, Debug)]
pub struct QueryContext {
    pub client_ip: IpAddr,
}

impl QueryContext {
    pub fn new(client_ip: IpAddr) -> Self {
        QueryContext { client_ip }
    }
}

/// The uniform stage contract from spec §2: given a context and a request
/// message, produce a response message and a source tag, or an error.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn resolve(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)>;
}

/// The fully assembled, currently active pipeline. `DnsCore` swaps this
/// pointer atomically on `SetUpstreams` (spec §4.8); in-flight requests
/// holding a clone of the old `Arc` run to completion unaffected.
pub type Pipeline = Arc<dyn Stage>;
