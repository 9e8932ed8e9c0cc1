//! Cache resolver (spec §4.5): bounded LRU keyed by `(name, qtype)`, with
//! single-flight coalescing, TTL clamping, and size accounting. The serve-
//! stale decorator in `stale.rs` wraps this struct directly so both paths
//! share the same single-flight key namespace (spec §9).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::dns::DnsMessage;
use crate::dns::name::canonicalize;
use crate::error::{ResolverError, Result};
use crate::metrics::Metrics;

use super::{Pipeline, QueryContext, SourceTag, Stage};

/// `lower(name) + ":" + qtype` per spec §4.5. Kept as a struct (rather than
/// the raw string) so equality/hash are cheap and the filter/sort helpers in
/// `list()` don't need to re-split a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub qtype: u16,
}

impl CacheKey {
    pub fn new(name: &str, qtype: u16) -> Self {
        CacheKey {
            name: canonicalize(name),
            qtype,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    message: DnsMessage,
    expires_at: Instant,
    size_bytes: usize,
}

/// Fixed set `delete(name, qtype=0)` clears (spec §4.5).
const COMMON_DELETABLE_TYPES: [u16; 8] = [1, 28, 5, 15, 2, 16, 33, 12]; // A,AAAA,CNAME,MX,NS,TXT,SRV,PTR

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortBy {
    Name,
    Expires,
    Qtype,
    Answers,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug)]
pub struct CacheListEntry {
    pub name: String,
    pub qtype: u16,
    pub expires_in_secs: i64,
    pub answer_count: usize,
}

pub struct CacheListResult {
    pub entries: Vec<CacheListEntry>,
    pub total_unexpired: usize,
}

type InflightResult = std::result::Result<(DnsMessage, SourceTag), ResolverError>;

pub struct Cache {
    entries: Mutex<FxHashMap<CacheKey, CacheEntry>>,
    /// Front = least recently used, back = most recently used.
    order: Mutex<VecDeque<CacheKey>>,
    current_size: AtomicUsize,
    max_entries: usize,
    max_bytes: usize,
    min_ttl: u32,
    max_ttl: u32,
    inflight: DashMap<CacheKey, broadcast::Sender<InflightResult>>,
    metrics: Option<Arc<Metrics>>,
    next: Pipeline,
}

impl Cache {
    pub fn new(
        max_entries: usize,
        max_bytes: usize,
        min_ttl: u32,
        max_ttl: u32,
        metrics: Option<Arc<Metrics>>,
        next: Pipeline,
    ) -> Self {
        Cache {
            entries: Mutex::new(FxHashMap::default()),
            order: Mutex::new(VecDeque::new()),
            current_size: AtomicUsize::new(0),
            max_entries,
            max_bytes,
            min_ttl,
            max_ttl,
            inflight: DashMap::new(),
            metrics,
            next,
        }
    }

    fn touch(&self, key: &CacheKey) {
        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|k| k == key) {
            let k = order.remove(pos).unwrap();
            order.push_back(k);
        }
    }

    /// Returns the live entry for `key`, or `None` if absent or expired.
    /// Does not evict — used by the plain cache path, which evicts
    /// explicitly, and by the serve-stale peek, which must not mutate state
    /// on a stale read.
    fn peek(&self, key: &CacheKey) -> Option<(DnsMessage, bool)> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        let now = Instant::now();
        let expired = entry.expires_at <= now;
        let mut message = entry.message.clone();
        let remaining = entry.expires_at.saturating_duration_since(now).as_secs() as u32;
        message.set_all_ttls(remaining);
        Some((message, expired))
    }

    fn evict_key(&self, key: &CacheKey) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.remove(key) {
            self.current_size.fetch_sub(entry.size_bytes, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.inc_cache_eviction();
            }
        }
        drop(entries);
        self.order.lock().retain(|k| k != key);
    }

    fn evict_front(&self) -> bool {
        let front = self.order.lock().pop_front();
        match front {
            Some(key) => {
                let mut entries = self.entries.lock();
                if let Some(entry) = entries.remove(&key) {
                    self.current_size.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Admission per spec §4.5 `put`: clamp effective TTL, compute wire
    /// size, evict under the configured bounds, then insert a deep copy.
    fn admit(&self, key: CacheKey, message: DnsMessage) {
        let min_answer_ttl = message.min_answer_ttl().unwrap_or(self.min_ttl);
        let effective_ttl = min_answer_ttl.clamp(self.min_ttl, self.max_ttl.max(self.min_ttl));
        let wire_size = message
            .to_wire()
            .map(|w| w.len())
            .unwrap_or_else(|_| fallback_size(&message));

        // Replacing an existing entry: drop its old size first so eviction
        // accounting stays exact (spec §4.5 invariant: current_size equals
        // the sum of size_bytes at rest).
        if let Some(old) = self.entries.lock().remove(&key) {
            self.current_size.fetch_sub(old.size_bytes, Ordering::Relaxed);
            self.order.lock().retain(|k| k != &key);
        }

        if self.max_bytes > 0 {
            while self.current_size.load(Ordering::Relaxed) + wire_size > self.max_bytes {
                if !self.evict_front() {
                    break;
                }
            }
        }
        if self.max_entries > 0 {
            while self.entries.lock().len() >= self.max_entries {
                if !self.evict_front() {
                    break;
                }
            }
        }

        let expires_at = Instant::now() + Duration::from_secs(effective_ttl as u64);
        self.entries.lock().insert(
            key.clone(),
            CacheEntry {
                message,
                expires_at,
                size_bytes: wire_size,
            },
        );
        self.order.lock().push_back(key);
        self.current_size.fetch_add(wire_size, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.set_cache_entries(self.entries.lock().len());
            metrics.set_cache_bytes(self.current_size.load(Ordering::Relaxed));
        }
    }

    /// Single-flight miss path: only one call into `next.resolve` per key
    /// is in flight at a time; concurrent callers for the same key share
    /// its outcome (spec §4.5/§8/§9).
    async fn miss_path(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
        key: CacheKey,
    ) -> Result<(DnsMessage, SourceTag)> {
        if let Some(metrics) = &self.metrics {
            metrics.inc_cache_miss();
        }

        let role = match self.inflight.entry(key.clone()) {
            DashEntry::Occupied(occupied) => Follower(occupied.get().subscribe()),
            DashEntry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                Leader(tx)
            }
        };

        let result: InflightResult = match role {
            Leader(tx) => {
                let outcome = self.next.resolve(ctx, query).await;
                self.inflight.remove(&key);
                if let Ok((message, _source)) = &outcome {
                    if message.has_answers() {
                        self.admit(key.clone(), message.clone());
                    }
                }
                let _ = tx.send(outcome.clone());
                outcome
            }
            Follower(mut rx) => rx
                .recv()
                .await
                .unwrap_or_else(|_| Err(ResolverError::Cancelled)),
        };

        result.map(|(mut message, source)| {
            message.rebind_to(query);
            (message, source)
        })
    }

    /// Spawns a background refresh under the same single-flight key the
    /// miss path uses, for the serve-stale decorator (spec §4.5/§9).
    pub fn spawn_refresh(self: &Arc<Self>, ctx: QueryContext, query: DnsMessage, key: CacheKey) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.miss_path(&ctx, &query, key).await {
                debug!(error = %err, "serve-stale background refresh failed");
            }
        });
    }

    pub fn peek_raw(&self, key: &CacheKey) -> Option<(DnsMessage, bool)> {
        self.peek(key)
    }

    pub fn delete(&self, name: &str, qtype: u16) {
        let name = canonicalize(name);
        if qtype == 0 {
            for t in COMMON_DELETABLE_TYPES {
                self.evict_key(&CacheKey { name: name.clone(), qtype: t });
            }
        } else {
            self.evict_key(&CacheKey { name, qtype });
        }
    }

    /// Admin single-entry lookup by key (the `Get` op of the cache admin
    /// surface, spec §6.4) — a non-mutating peek, not a cache read.
    pub fn get(&self, name: &str, qtype: u16) -> Option<CacheListEntry> {
        let key = CacheKey::new(name, qtype);
        let entries = self.entries.lock();
        let entry = entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(CacheListEntry {
            name: key.name,
            qtype: key.qtype,
            expires_in_secs: (entry.expires_at - Instant::now()).as_secs() as i64,
            answer_count: entry.message.answer.len(),
        })
    }

    /// The `DeleteKey` admin op (spec §6.4): delete exactly one `(name,
    /// qtype)` key, without `delete`'s `qtype == 0` common-types fan-out.
    pub fn delete_key(&self, name: &str, qtype: u16) {
        self.evict_key(&CacheKey::new(name, qtype));
    }

    pub fn flush(&self) {
        self.entries.lock().clear();
        self.order.lock().clear();
        self.current_size.store(0, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.set_cache_entries(0);
            metrics.set_cache_bytes(0);
        }
    }

    pub fn list(
        &self,
        offset: usize,
        limit: usize,
        query: &str,
        sort_by: SortBy,
        order: SortOrder,
    ) -> CacheListResult {
        let now = Instant::now();
        let query_lower = query.to_lowercase();
        let entries = self.entries.lock();

        let mut view: Vec<(&CacheKey, &CacheEntry)> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .filter(|(key, _)| query_lower.is_empty() || key.name.contains(&query_lower))
            .collect();
        let total_unexpired = entries.values().filter(|e| e.expires_at > now).count();

        view.sort_by(|(ka, ea), (kb, eb)| {
            let primary = match sort_by {
                SortBy::Name => ka.name.cmp(&kb.name),
                SortBy::Expires => ea.expires_at.cmp(&eb.expires_at),
                SortBy::Qtype => ka.qtype.cmp(&kb.qtype),
                SortBy::Answers => ea.message.answer.len().cmp(&eb.message.answer.len()),
            };
            let primary = match order {
                SortOrder::Asc => primary,
                SortOrder::Desc => primary.reverse(),
            };
            primary.then_with(|| ka.name.cmp(&kb.name).then_with(|| ka.qtype.cmp(&kb.qtype)))
        });

        let page = view
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(key, entry)| CacheListEntry {
                name: key.name.clone(),
                qtype: key.qtype,
                expires_in_secs: (entry.expires_at - now).as_secs() as i64,
                answer_count: entry.message.answer.len(),
            })
            .collect();

        CacheListResult {
            entries: page,
            total_unexpired,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }
}

enum SingleFlightRole {
    Leader(broadcast::Sender<InflightResult>),
    Follower(broadcast::Receiver<InflightResult>),
}
use SingleFlightRole::{Follower, Leader};

fn fallback_size(message: &DnsMessage) -> usize {
    let name_bytes: usize = message
        .questions
        .iter()
        .map(|q| q.name.len() + 4)
        .sum();
    12 + name_bytes
        + 35 * (message.answer.len() + message.authority.len() + message.additional.len())
}

#[async_trait]
impl Stage for Cache {
    async fn resolve(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)> {
        let Some(question) = query.question() else {
            return self.next.resolve(ctx, query).await;
        };
        let key = CacheKey::new(&question.name, u16::from(question.qtype));

        if let Some((mut message, expired)) = self.peek(&key) {
            if !expired {
                self.touch(&key);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_cache_hit();
                }
                message.rebind_to(query);
                trace!(name = %question.name, "cache hit");
                return Ok((message, "cache".to_string()));
            }
            self.evict_key(&key);
        }

        self.miss_path(ctx, query, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Question, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};

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
        calls: StdAtomicUsize,
    }

    #[async_trait]
    impl Stage for CountingUpstream {
        async fn resolve(
            &self,
            _ctx: &QueryContext,
            query: &DnsMessage,
        ) -> Result<(DnsMessage, SourceTag)> {
            self.calls.fetch_add(1, StdOrdering::SeqCst);
            let mut reply = query.new_reply();
            reply
                .answer
                .push(Record::new_a("example.com", 300, Ipv4Addr::new(93, 184, 216, 34)));
            Ok((reply, "udp:1.1.1.1:53".to_string()))
        }
    }

    #[tokio::test]
    async fn second_identical_query_hits_cache_without_upstream_call() {
        let upstream = Arc::new(CountingUpstream {
            calls: StdAtomicUsize::new(0),
        });
        let cache = Cache::new(100, 0, 60, 3600, None, upstream.clone());
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());

        let (first, source1) = cache.resolve(&ctx, &query("example.com")).await.unwrap();
        assert_eq!(source1, "udp:1.1.1.1:53");
        assert_eq!(first.answer[0].ip_address(), Some(Ipv4Addr::new(93, 184, 216, 34).into()));

        let (second, source2) = cache.resolve(&ctx, &query("example.com")).await.unwrap();
        assert_eq!(source2, "cache");
        assert_eq!(second.header.id, query("example.com").header.id);
        assert_eq!(upstream.calls.load(StdOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_answer_response_is_not_admitted() {
        struct EmptyUpstream;
        #[async_trait]
        impl Stage for EmptyUpstream {
            async fn resolve(
                &self,
                _ctx: &QueryContext,
                query: &DnsMessage,
            ) -> Result<(DnsMessage, SourceTag)> {
                Ok((query.new_reply(), "udp:1.1.1.1:53".to_string()))
            }
        }
        let cache = Cache::new(100, 0, 60, 3600, None, Arc::new(EmptyUpstream));
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());
        cache.resolve(&ctx, &query("nodata.example")).await.unwrap();
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_misses_issue_a_single_upstream_call() {
        let upstream = Arc::new(CountingUpstream {
            calls: StdAtomicUsize::new(0),
        });
        let cache = Arc::new(Cache::new(100, 0, 60, 3600, None, upstream.clone()));
        let ctx = QueryContext::new("127.0.0.1".parse().unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve(&ctx, &query("concurrent.example")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(upstream.calls.load(StdOrdering::SeqCst), 1);
    }
}
