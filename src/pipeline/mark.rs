//! Mark post-processor (spec §4.3): tags answer IPs for egress routing via
//! an asynchronous, debounced, deduplicated marker so the DNS response path
//! is never blocked by the firewall backend.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::MarkBackend;
use crate::dns::name::canonicalize;
use crate::dns::DnsMessage;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::rules::RuleStore;

use super::{Pipeline, QueryContext, SourceTag, Stage};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
const DEDUP_BUFFER: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The debounced, deduplicated worker that actually calls `MarkBackend`.
/// Dedup/pending maps each carry a single mutex guarding their debounce
/// timer, per the single-mutex-per-map discipline in spec §5.
pub struct AsyncMarker {
    backend: Arc<dyn MarkBackend>,
    metrics: Option<Arc<Metrics>>,
    dedup: DashMap<(IpAddr, String), Instant>,
    pending: DashMap<(IpAddr, String), (String, u32)>,
    timer: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncMarker {
    pub fn new(backend: Arc<dyn MarkBackend>, metrics: Option<Arc<Metrics>>) -> Arc<Self> {
        let marker = Arc::new(AsyncMarker {
            backend,
            metrics,
            dedup: DashMap::new(),
            pending: DashMap::new(),
            timer: Mutex::new(None),
            sweeper: Mutex::new(None),
        });
        marker.clone().spawn_sweeper();
        marker
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                let now = Instant::now();
                self.dedup.retain(|_, expires_at| *expires_at > now);
                self.report_tracked_ips();
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Refreshes the `tracked_ips{iface}` gauge (spec §6.6) from the current
    /// dedup map — the set of IPs considered "live-marked" right now.
    fn report_tracked_ips(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let mut per_iface: HashMap<String, usize> = HashMap::new();
        for entry in self.dedup.iter() {
            *per_iface.entry(entry.key().1.clone()).or_insert(0) += 1;
        }
        for (iface, count) in per_iface {
            metrics.set_tracked_ips(&iface, count);
        }
    }

    /// Enqueues `(ip, via, ttl)`, skipping it if a live dedup entry already
    /// covers it within the 5 s pre-refresh buffer (spec §4.3/§9).
    pub fn enqueue(self: &Arc<Self>, ip: IpAddr, via: String, ttl: u32) {
        let key = (ip, via.clone());
        let now = Instant::now();
        if let Some(expires_at) = self.dedup.get(&key) {
            if now < expires_at.saturating_sub(DEDUP_BUFFER) {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_marks_dropped();
                }
                return;
            }
        }

        self.pending.insert(key, (via, ttl));
        self.rearm_timer();
    }

    fn rearm_timer(self: &Arc<Self>) {
        let mut guard = self.timer.lock();
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        let this = self.clone();
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            this.fire().await;
        }));
    }

    async fn fire(&self) {
        let batch: Vec<_> = self
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (key, _) in &batch {
            self.pending.remove(key);
        }

        for ((ip, _via_key), (via, ttl)) in batch {
            match self.backend.mark_ip(&via, ip, ttl).await {
                Ok(()) => {
                    self.dedup
                        .insert((ip, via), Instant::now() + Duration::from_secs(ttl as u64));
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_marks_success();
                    }
                }
                Err(err) => {
                    warn!(%ip, via, error = %err, "mark backend call failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_marks_error();
                    }
                }
            }
        }
        self.report_tracked_ips();
    }

    /// Stops the debounce timer and sweeper, then drains and processes
    /// whatever is left in the pending map (spec §4.3 "Shutdown").
    pub async fn shutdown(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.fire().await;
    }
}

pub struct MarkPostProcessor {
    rules: Arc<RuleStore>,
    marker: Arc<AsyncMarker>,
    min_ttl: u32,
    max_ttl: u32,
    next: Pipeline,
}

impl MarkPostProcessor {
    pub fn new(
        rules: Arc<RuleStore>,
        marker: Arc<AsyncMarker>,
        min_ttl: u32,
        max_ttl: u32,
        next: Pipeline,
    ) -> Self {
        MarkPostProcessor {
            rules,
            marker,
            min_ttl,
            max_ttl,
            next,
        }
    }
}

#[async_trait]
impl Stage for MarkPostProcessor {
    async fn resolve(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)> {
        let (response, source) = self.next.resolve(ctx, query).await?;

        if !response.has_answers() {
            return Ok((response, source));
        }
        let Some(question) = query.question() else {
            return Ok((response, source));
        };
        let name = canonicalize(&question.name);

        if let Some(rule) = self.rules.find(&name) {
            for record in &response.answer {
                let Some(ip) = record.ip_address() else {
                    continue;
                };
                let ttl = if rule.pin_ttl {
                    record.ttl.clamp(self.min_ttl, self.max_ttl)
                } else {
                    record.ttl.max(30)
                };
                debug!(%ip, via = %rule.via, ttl, "enqueueing mark");
                self.marker.enqueue(ip, rule.via.clone(), ttl);
            }
        }

        Ok((response, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Question, Record, RecordType};
    use crate::rules::Rule;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarkBackend for CountingBackend {
        async fn mark_ip(
            &self,
            _iface: &str,
            _ip: IpAddr,
            _ttl: u32,
        ) -> std::result::Result<(), crate::backend::MarkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedAnswer;

    #[async_trait]
    impl Stage for FixedAnswer {
        async fn resolve(
            &self,
            _ctx: &QueryContext,
            query: &DnsMessage,
        ) -> Result<(DnsMessage, SourceTag)> {
            let mut reply = query.new_reply();
            reply
                .answer
                .push(Record::new_a("a.vpn.example", 5, Ipv4Addr::new(203, 0, 113, 9)));
            Ok((reply, "udp:1.2.3.4:53".to_string()))
        }
    }

    fn query() -> DnsMessage {
        DnsMessage {
            header: Header {
                id: 9,
                qdcount: 1,
                recursion_desired: true,
                ..Default::default()
            },
            questions: vec![Question {
                name: "a.vpn.example".into(),
                qtype: RecordType::A,
                qclass: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_suppresses_repeat_mark_within_ttl() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let rules = Arc::new(RuleStore::new());
        rules.upsert(Rule {
            pattern: "*.vpn.example".into(),
            via: "wg0".into(),
            pin_ttl: true,
        });
        let marker = AsyncMarker::new(backend.clone(), None);
        let stage = MarkPostProcessor::new(rules, marker, 60, 3600, Arc::new(FixedAnswer));
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());

        stage.resolve(&ctx, &query()).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        stage.resolve(&ctx, &query()).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        // Still within the 60s pinned TTL minus the 5s buffer: no second call.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
