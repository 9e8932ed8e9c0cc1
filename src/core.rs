//! `DnsCore`: the admin contract surface spec §6.4 lists, and the entry
//! point that wires the managers, history buffer, and listener together.
//! This is the *only* public surface an outer admin layer (out of scope)
//! would call; no HTTP framework is introduced here.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::history::{HistoryBuffer, QueryEvent, QueryStatus};
use crate::hosts::HostOverride;
use crate::listener::Listener;
use crate::managers::Managers;
use crate::metrics::Metrics;
use crate::pipeline::cache::{CacheListResult, SortBy, SortOrder};
use crate::rules::{RuleGroup, RuleStore};
use crate::upstream::UpstreamDescriptor;

pub struct DnsCore {
    managers: Arc<Managers>,
    history: Arc<HistoryBuffer>,
    metrics: Arc<Metrics>,
}

impl DnsCore {
    pub fn new(managers: Arc<Managers>, metrics: Arc<Metrics>) -> Arc<DnsCore> {
        let history = Arc::new(HistoryBuffer::new(managers.history_capacity()));
        Arc::new(DnsCore {
            managers,
            history,
            metrics,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Binds the DNS listener and runs until the process is signalled to
    /// shut down (spec §4.7/§6.4 `Start`).
    pub async fn start(self: &Arc<Self>, listen_udp: &str, listen_tcp: &str) -> Result<()> {
        let listener = Listener::bind(listen_udp, listen_tcp, self.clone()).await?;
        self.metrics.set_ready(true);
        info!(udp = listen_udp, tcp = listen_tcp, "dns listener ready");
        listener.run().await
    }

    /// The currently active pipeline (spec §4.8): exposed so an embedding
    /// binary — or a test — can drive a resolve directly without going
    /// through a socket.
    pub fn active_pipeline(&self) -> crate::pipeline::Pipeline {
        self.managers.active_pipeline()
    }

    /// Drains in-flight mark requests before the process exits (spec §4.3
    /// "Shutdown", §6.4 "lifecycle shutdown on ctx cancel").
    pub async fn shutdown(&self) {
        self.managers.shutdown().await;
    }

    pub(crate) fn record_query(
        &self,
        name: String,
        qtype: crate::dns::RecordType,
        upstream: String,
        duration: Duration,
        status: QueryStatus,
        client_ip: IpAddr,
    ) {
        self.history
            .record(name, qtype, upstream, duration, status, client_ip);
    }

    // --- Rules -------------------------------------------------------

    pub fn rules(&self) -> Arc<RuleStore> {
        self.managers.rules()
    }

    pub fn get_rule_groups(&self) -> Vec<RuleGroup> {
        self.managers.get_rule_groups()
    }

    pub fn persist_rules(&self) {
        self.managers.persist_rules();
    }

    /// Replaces the rule groups wholesale (config-file hot reload). Does
    /// not rebuild the pipeline — the mark post-processor reads the rule
    /// store fresh on every query, same as hosts (spec §4.8).
    pub fn set_rule_groups(&self, groups: Vec<RuleGroup>) {
        self.managers.set_rule_groups(groups);
    }

    // --- Upstreams -----------------------------------------------------

    pub fn get_upstreams(&self) -> Vec<UpstreamDescriptor> {
        self.managers.get_upstreams()
    }

    pub fn set_upstreams_config(&self, upstreams: Vec<UpstreamDescriptor>) -> Result<()> {
        self.managers.set_upstreams(upstreams)
    }

    // --- Hosts -----------------------------------------------------------

    pub fn get_hosts(&self) -> Vec<HostOverride> {
        self.managers.get_hosts()
    }

    pub fn set_hosts(&self, hosts: Vec<HostOverride>) -> Result<()> {
        self.managers.set_hosts(hosts)
    }

    // --- Cache (spec §6.4 "Cache() surface: List/Get/Delete/DeleteKey/Flush") --

    pub fn cache_list(
        &self,
        offset: usize,
        limit: usize,
        query: &str,
        sort_by: SortBy,
        order: SortOrder,
    ) -> Option<CacheListResult> {
        self.managers
            .cache()
            .map(|cache| cache.list(offset, limit, query, sort_by, order))
    }

    pub fn cache_get(&self, name: &str, qtype: u16) -> Option<crate::pipeline::cache::CacheListEntry> {
        self.managers.cache().and_then(|cache| cache.get(name, qtype))
    }

    pub fn cache_delete(&self, name: &str, qtype: u16) {
        if let Some(cache) = self.managers.cache() {
            cache.delete(name, qtype);
        }
    }

    pub fn cache_delete_key(&self, name: &str, qtype: u16) {
        if let Some(cache) = self.managers.cache() {
            cache.delete_key(name, qtype);
        }
    }

    pub fn cache_flush(&self) {
        if let Some(cache) = self.managers.cache() {
            cache.flush();
        }
    }

    // --- History --------------------------------------------------------

    pub fn history(&self) -> Vec<QueryEvent> {
        self.history.all()
    }

    pub fn history_paginated(&self, offset: usize, limit: usize) -> Vec<QueryEvent> {
        self.history.paginated(offset, limit)
    }

    pub fn history_size(&self) -> usize {
        self.history.size()
    }
}
