//! Chain/failover resolver (spec §4.2): tries upstreams in weight-sorted
//! order, preferring a remembered empty (NODATA/NXDOMAIN) answer over the
//! first error once every upstream has been exhausted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dns::DnsMessage;
use crate::error::{ResolverError, Result, UpstreamError};
use crate::metrics::Metrics;
use crate::upstream::{UpstreamDescriptor, transport_for};

use super::{QueryContext, SourceTag, Stage};

/// Per-upstream observability-only health bookkeeping (SPEC_FULL.md §3
/// supplement). Never influences iteration order — weight order is the
/// sole routing decision, per spec §8's ordering testable property.
#[derive(Default)]
pub struct UpstreamHealth {
    pub consecutive_failures: AtomicU64,
}

pub struct ChainUpstream {
    pub descriptor: UpstreamDescriptor,
    pub health: UpstreamHealth,
}

/// Ordered list of upstreams, already sorted by weight descending with
/// ties broken by original configuration order (stable sort).
pub struct ChainResolver {
    upstreams: Vec<ChainUpstream>,
    metrics: Option<std::sync::Arc<Metrics>>,
}

impl ChainResolver {
    pub fn new(mut descriptors: Vec<UpstreamDescriptor>, metrics: Option<std::sync::Arc<Metrics>>) -> Self {
        descriptors.sort_by(|a, b| b.weight.cmp(&a.weight));
        let upstreams = descriptors
            .into_iter()
            .map(|descriptor| ChainUpstream {
                descriptor,
                health: UpstreamHealth::default(),
            })
            .collect();
        ChainResolver { upstreams, metrics }
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}

#[async_trait]
impl Stage for ChainResolver {
    async fn resolve(
        &self,
        _ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)> {
        if self.upstreams.is_empty() {
            return Err(ResolverError::NoUpstreamsConfigured);
        }

        let mut last_empty: Option<(DnsMessage, SourceTag)> = None;
        let mut first_error: Option<UpstreamError> = None;

        for upstream in &self.upstreams {
            let descriptor = &upstream.descriptor;
            let transport = transport_for(descriptor.transport.unwrap_or_default());
            let started = Instant::now();

            match transport.exchange(descriptor, query).await {
                Ok(exchange) => {
                    upstream.health.consecutive_failures.store(0, Ordering::Relaxed);
                    let source = format!(
                        "{}:{}",
                        transport_name(descriptor.transport.unwrap_or_default()),
                        descriptor.address
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_upstream_rtt(exchange.rtt.as_secs_f64());
                        metrics.observe_upstream_duration(&source, started.elapsed().as_secs_f64());
                    }

                    if exchange.response.has_answers() {
                        return Ok((exchange.response, source));
                    }
                    debug!(upstream = %descriptor.name, "upstream returned zero answers, remembering as fallback");
                    last_empty.get_or_insert((exchange.response, source));
                }
                Err(err) => {
                    upstream.health.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(upstream = %descriptor.name, error = %err, "upstream exchange failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_resolve_error(&descriptor.name);
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(empty) = last_empty {
            return Ok(empty);
        }
        match first_error {
            Some(err) => Err(ResolverError::AllUpstreamsFailed(err)),
            None => Err(ResolverError::NoUpstreamsConfigured),
        }
    }
}

fn transport_name(transport: crate::upstream::Transport) -> &'static str {
    match transport {
        crate::upstream::Transport::Udp => "udp",
        crate::upstream::Transport::Tcp => "tcp",
        crate::upstream::Transport::Dot => "dot",
        crate::upstream::Transport::Doh => "doh",
        crate::upstream::Transport::Doq => "doq",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Question, RecordType};

    fn query() -> DnsMessage {
        DnsMessage {
            header: Header {
                id: 7,
                qdcount: 1,
                recursion_desired: true,
                ..Default::default()
            },
            questions: vec![Question {
                name: "example.com".into(),
                qtype: RecordType::A,
                qclass: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn descriptor(name: &str, weight: i32) -> UpstreamDescriptor {
        UpstreamDescriptor {
            name: name.into(),
            address: "127.0.0.1:0".into(),
            transport: Some(crate::upstream::Transport::Udp),
            weight,
            timeout_ms: 100,
            server_name: None,
        }
    }

    #[test]
    fn sorts_by_weight_descending_stable_on_ties() {
        let resolver = ChainResolver::new(
            vec![descriptor("a", 1), descriptor("b", 5), descriptor("c", 5)],
            None,
        );
        let names: Vec<_> = resolver.upstreams.iter().map(|u| u.descriptor.name.clone()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn empty_upstream_list_errors() {
        let resolver = ChainResolver::new(vec![], None);
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());
        let err = resolver.resolve(&ctx, &query()).await.unwrap_err();
        assert!(matches!(err, ResolverError::NoUpstreamsConfigured));
    }
}
