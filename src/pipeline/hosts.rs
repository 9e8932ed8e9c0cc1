//! Host-override resolver (spec §4.4): short-circuits queries matched by a
//! static pattern, reading the current override set fresh on every call so
//! edits take effect without a pipeline rebuild (spec §4.8/§9).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::dns::{DnsMessage, RecordType, Record};
use crate::dns::name::{canonicalize, matches_pattern};
use crate::error::Result;
use crate::hosts::HostOverride;

use super::{Pipeline, QueryContext, SourceTag, Stage};

const DEFAULT_HOST_TTL: u32 = 60;

pub struct HostsResolver {
    hosts: Arc<RwLock<Vec<HostOverride>>>,
    next: Pipeline,
}

impl HostsResolver {
    pub fn new(hosts: Arc<RwLock<Vec<HostOverride>>>, next: Pipeline) -> Self {
        HostsResolver { hosts, next }
    }
}

#[async_trait]
impl Stage for HostsResolver {
    async fn resolve(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)> {
        let Some(question) = query.question() else {
            return self.next.resolve(ctx, query).await;
        };
        let name = canonicalize(&question.name);

        let snapshot = self.hosts.read().clone();
        for entry in &snapshot {
            if !matches_pattern(&entry.pattern, &name) {
                continue;
            }
            let ttl = if entry.ttl > 0 { entry.ttl } else { DEFAULT_HOST_TTL };

            let mut records = Vec::new();
            if matches!(question.qtype, RecordType::A | RecordType::ANY) {
                records.extend(entry.a.iter().map(|ip| Record::new_a(&question.name, ttl, *ip)));
            }
            if matches!(question.qtype, RecordType::AAAA | RecordType::ANY) {
                records.extend(
                    entry
                        .aaaa
                        .iter()
                        .filter(|ip| !is_ipv4_mapped(ip))
                        .map(|ip| Record::new_aaaa(&question.name, ttl, *ip)),
                );
            }

            if records.is_empty() {
                continue;
            }

            let mut reply = query.new_reply();
            reply.header.authoritative = true;
            reply.answer = records;
            return Ok((reply, "hosts".to_string()));
        }

        self.next.resolve(ctx, query).await
    }
}

fn is_ipv4_mapped(addr: &Ipv6Addr) -> bool {
    matches!(IpAddr::V6(*addr), IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Question};
    use std::sync::Arc;

    struct NoopNext;

    #[async_trait]
    impl Stage for NoopNext {
        async fn resolve(
            &self,
            _ctx: &QueryContext,
            query: &DnsMessage,
        ) -> Result<(DnsMessage, SourceTag)> {
            Ok((query.servfail(), "next".to_string()))
        }
    }

    fn query_for(name: &str, qtype: RecordType) -> DnsMessage {
        DnsMessage {
            header: Header {
                id: 1,
                qdcount: 1,
                recursion_desired: true,
                ..Default::default()
            },
            questions: vec![Question {
                name: name.into(),
                qtype,
                qclass: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn wildcard_override_short_circuits_with_hosts_source() {
        let hosts = Arc::new(RwLock::new(vec![HostOverride {
            pattern: "*.internal".into(),
            a: vec![Ipv4Addr::new(10, 0, 0, 5)],
            aaaa: vec![],
            ttl: 120,
        }]));
        let resolver = HostsResolver::new(hosts, Arc::new(NoopNext));
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());
        let (reply, source) = resolver
            .resolve(&ctx, &query_for("api.internal", RecordType::A))
            .await
            .unwrap();
        assert_eq!(source, "hosts");
        assert!(reply.header.authoritative);
        assert_eq!(reply.answer.len(), 1);
        assert_eq!(reply.answer[0].ttl, 120);
    }

    #[tokio::test]
    async fn non_matching_query_falls_through_to_next() {
        let hosts = Arc::new(RwLock::new(vec![HostOverride {
            pattern: "internal.example".into(),
            a: vec![Ipv4Addr::new(10, 0, 0, 5)],
            aaaa: vec![],
            ttl: 0,
        }]));
        let resolver = HostsResolver::new(hosts, Arc::new(NoopNext));
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());
        let (reply, source) = resolver
            .resolve(&ctx, &query_for("elsewhere.example", RecordType::A))
            .await
            .unwrap();
        assert_eq!(source, "next");
        assert_eq!(reply.header.rcode, crate::dns::ResponseCode::ServerFailure);
    }
}
