//! Serve-stale decorator (spec §4.5 "Serve-stale"): sits between the cache
//! and its `next`, returning an expired entry immediately while refreshing
//! it in the background under the cache's own single-flight key namespace.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dns::DnsMessage;
use crate::error::Result;

use super::cache::{Cache, CacheKey};
use super::{QueryContext, SourceTag, Stage};

pub struct ServeStale {
    cache: Arc<Cache>,
}

impl ServeStale {
    pub fn new(cache: Arc<Cache>) -> Self {
        ServeStale { cache }
    }
}

#[async_trait]
impl Stage for ServeStale {
    async fn resolve(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)> {
        let Some(question) = query.question() else {
            return self.cache.resolve(ctx, query).await;
        };
        let key = CacheKey::new(&question.name, u16::from(question.qtype));

        match self.cache.peek_raw(&key) {
            Some((_, false)) => self.cache.resolve(ctx, query).await,
            Some((mut stale, true)) => {
                self.cache
                    .spawn_refresh(ctx.clone(), query.clone(), key);
                stale.rebind_to(query);
                Ok((stale, "cache".to_string()))
            }
            None => self.cache.resolve(ctx, query).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Question, Record, RecordType};
    use crate::pipeline::QueryContext;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn query(name: &str) -> DnsMessage {
        DnsMessage {
            header: Header {
                id: 1,
                qdcount: 1,
                recursion_desired: true,
                ..Default::default()
            },
            questions: vec![Question {
                name: name.into(),
                qtype: RecordType::A,
                qclass: Default::default(),
            }],
            ..Default::default()
        }
    }

    struct CountingUpstream {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Stage for CountingUpstream {
        async fn resolve(
            &self,
            _ctx: &QueryContext,
            query: &DnsMessage,
        ) -> Result<(DnsMessage, SourceTag)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut reply = query.new_reply();
            reply
                .answer
                .push(Record::new_a("stale.example", 1, Ipv4Addr::new(10, 0, 0, 1)));
            Ok((reply, "udp:1.1.1.1:53".to_string()))
        }
    }

    #[tokio::test]
    async fn stale_entry_returns_immediately_and_refreshes_in_background() {
        let upstream = Arc::new(CountingUpstream {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(Cache::new(100, 0, 1, 1, None, upstream.clone()));
        let stale = ServeStale::new(cache.clone());
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());

        stale.resolve(&ctx, &query("stale.example")).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let (reply, source) = stale.resolve(&ctx, &query("stale.example")).await.unwrap();
        assert_eq!(source, "cache");
        assert_eq!(reply.answer[0].ip_address(), Some(Ipv4Addr::new(10, 0, 0, 1).into()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
    }
}
