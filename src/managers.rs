//! The five independent managers (spec §4.8) and the atomic pipeline swap
//! that rebuilds on upstream changes. Grounded on the teacher's
//! `config_reload.rs` lock discipline, formalized with `parking_lot::RwLock`
//! throughout per SPEC_FULL.md §4.8.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::backend::MarkBackend;
use crate::config::Config;
use crate::error::Result;
use crate::hosts::HostOverride;
use crate::metrics::Metrics;
use crate::pipeline::cache::Cache;
use crate::pipeline::chain::ChainResolver;
use crate::pipeline::hosts::HostsResolver;
use crate::pipeline::mark::{AsyncMarker, MarkPostProcessor};
use crate::pipeline::metrics_stage::MetricsStage;
use crate::pipeline::stale::ServeStale;
use crate::pipeline::Pipeline;
use crate::rules::{self, RuleGroup, RuleStore};
use crate::upstream::{addr, UpstreamDescriptor};
use crate::validation;

/// Aggregates the upstreams/hosts/rules/cache/config managers behind
/// read-write locks and owns the active pipeline pointer (spec §4.8/§9).
pub struct Managers {
    upstreams: RwLock<Vec<UpstreamDescriptor>>,
    hosts: Arc<RwLock<Vec<HostOverride>>>,
    rules: Arc<RuleStore>,
    rule_groups: RwLock<Vec<RuleGroup>>,
    cache: RwLock<Option<Arc<Cache>>>,
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    metrics: Arc<Metrics>,
    marker: Option<Arc<AsyncMarker>>,
    pipeline: RwLock<Pipeline>,
}

impl Managers {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        metrics: Arc<Metrics>,
        mark_backend: Option<Arc<dyn MarkBackend>>,
    ) -> Result<Arc<Managers>> {
        validation::validate_upstreams(&config.upstreams)?;
        validation::validate_hosts(&config.hosts)?;

        let mut upstreams = config.upstreams.clone();
        validation::normalize_upstream_weights(&mut upstreams);

        let rule_store = Arc::new(RuleStore::new());
        rule_store.replace_all(rules::flatten_groups(&config.rule_groups));

        let marker = mark_backend.map(|backend| AsyncMarker::new(backend, Some(metrics.clone())));

        // Placeholder pipeline until `rebuild_pipeline` populates it below —
        // never observed by a reader since the lock is taken before the
        // `Arc<Managers>` escapes this constructor.
        let placeholder: Pipeline = Arc::new(MetricsStage::new(
            metrics.clone(),
            Arc::new(ChainResolver::new(vec![], None)),
        ));

        let managers = Arc::new(Managers {
            upstreams: RwLock::new(upstreams),
            hosts: Arc::new(RwLock::new(config.hosts.clone())),
            rules: rule_store,
            rule_groups: RwLock::new(config.rule_groups.clone()),
            cache: RwLock::new(None),
            config: RwLock::new(config),
            config_path,
            metrics,
            marker,
            pipeline: RwLock::new(placeholder),
        });
        managers.rebuild_pipeline();
        Ok(managers)
    }

    pub fn active_pipeline(&self) -> Pipeline {
        self.pipeline.read().clone()
    }

    pub fn cache(&self) -> Option<Arc<Cache>> {
        self.cache.read().clone()
    }

    pub fn history_capacity(&self) -> usize {
        self.config.read().history.max_entries
    }

    /// Drains the async marker's pending mark queue before process exit
    /// (spec §4.3 "Shutdown"). A no-op when no mark backend was configured.
    pub async fn shutdown(&self) {
        if let Some(marker) = &self.marker {
            marker.shutdown().await;
        }
    }

    // --- Upstreams manager --------------------------------------------

    pub fn get_upstreams(&self) -> Vec<UpstreamDescriptor> {
        self.upstreams.read().clone()
    }

    /// `SetUpstreams` (spec §4.8): validates the whole batch atomically,
    /// updates in memory, rebuilds the pipeline, then persists best-effort.
    pub fn set_upstreams(&self, descriptors: Vec<UpstreamDescriptor>) -> Result<()> {
        validation::validate_upstreams(&descriptors)?;
        let mut normalized = descriptors;
        validation::normalize_upstream_weights(&mut normalized);
        *self.upstreams.write() = normalized;
        self.rebuild_pipeline();
        self.persist_async();
        Ok(())
    }

    // --- Hosts manager ---------------------------------------------------

    pub fn get_hosts(&self) -> Vec<HostOverride> {
        self.hosts.read().clone()
    }

    /// `SetHosts` (spec §4.8): no pipeline rebuild — the hosts resolver
    /// reads this same `Arc<RwLock<_>>` fresh on every query.
    pub fn set_hosts(&self, overrides: Vec<HostOverride>) -> Result<()> {
        validation::validate_hosts(&overrides)?;
        *self.hosts.write() = overrides;
        self.persist_async();
        Ok(())
    }

    // --- Rules manager ----------------------------------------------------

    pub fn rules(&self) -> Arc<RuleStore> {
        self.rules.clone()
    }

    /// Reconstructs a grouped view from the live rule store: one group per
    /// distinct `(via, pin_ttl)` pair, in first-seen order. Used for the
    /// admin contract's `GetRuleGroups`/`PersistRules`, since individual
    /// pattern edits via `rules().upsert(...)` don't carry a group identity.
    pub fn get_rule_groups(&self) -> Vec<RuleGroup> {
        let mut groups: Vec<RuleGroup> = Vec::new();
        for rule in self.rules.list() {
            if let Some(group) = groups
                .iter_mut()
                .find(|g| g.via == rule.via && g.pin_ttl == rule.pin_ttl)
            {
                group.patterns.push(rule.pattern);
            } else {
                groups.push(RuleGroup {
                    name: rule.via.clone(),
                    via: rule.via,
                    patterns: vec![rule.pattern],
                    pin_ttl: rule.pin_ttl,
                });
            }
        }
        groups
    }

    /// Replaces the rule groups wholesale (hot reload from the config file).
    pub fn set_rule_groups(&self, groups: Vec<RuleGroup>) {
        self.rules.replace_all(rules::flatten_groups(&groups));
        *self.rule_groups.write() = groups;
        self.persist_async();
    }

    pub fn persist_rules(&self) {
        let groups = self.get_rule_groups();
        *self.rule_groups.write() = groups;
        self.persist_async();
    }

    // --- Pipeline rebuild -------------------------------------------------

    /// Builds a fresh pipeline from the current upstreams/rules/cache config
    /// and atomically swaps the active pointer. In-flight requests holding
    /// the old `Arc<dyn Stage>` run to completion against the old upstream
    /// resolvers (spec §4.8/§5/§9).
    fn rebuild_pipeline(&self) {
        let resolved_upstreams: Vec<UpstreamDescriptor> = self
            .upstreams
            .read()
            .iter()
            .cloned()
            .map(|descriptor| {
                let parsed = addr::parse(&descriptor.address, descriptor.transport);
                UpstreamDescriptor {
                    address: parsed.endpoint,
                    transport: Some(parsed.transport),
                    ..descriptor
                }
            })
            .collect();

        let chain: Pipeline = Arc::new(ChainResolver::new(
            resolved_upstreams,
            Some(self.metrics.clone()),
        ));

        let cache_config = self.config.read().cache.clone();

        let after_chain: Pipeline = match &self.marker {
            Some(marker) => Arc::new(MarkPostProcessor::new(
                self.rules.clone(),
                marker.clone(),
                cache_config.min_ttl_seconds,
                cache_config.max_ttl_seconds,
                chain,
            )),
            None => chain,
        };

        let hosts_stage: Pipeline = Arc::new(HostsResolver::new(self.hosts.clone(), after_chain));

        let outer: Pipeline = if cache_config.enabled {
            let cache = Arc::new(Cache::new(
                cache_config.max_entries,
                cache_config.max_bytes(),
                cache_config.min_ttl_seconds,
                cache_config.max_ttl_seconds,
                Some(self.metrics.clone()),
                hosts_stage,
            ));
            *self.cache.write() = Some(cache.clone());
            if cache_config.serve_stale {
                Arc::new(ServeStale::new(cache))
            } else {
                cache
            }
        } else {
            *self.cache.write() = None;
            hosts_stage
        };

        let pipeline: Pipeline = Arc::new(MetricsStage::new(self.metrics.clone(), outer));
        *self.pipeline.write() = pipeline;
        info!("pipeline rebuilt");
    }

    // --- Persistence --------------------------------------------------

    /// Best-effort async disk save (spec §4.8 "Persistence"): the in-memory
    /// state is authoritative for the running process; a failed save is
    /// logged and simply superseded by the next one, never retried here.
    fn persist_async(&self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        let mut config = self.config.read().clone();
        config.upstreams = self.upstreams.read().clone();
        config.hosts = self.hosts.read().clone();
        config.rule_groups = self.rule_groups.read().clone();
        *self.config.write() = config.clone();

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || config.save(&path)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "failed to persist configuration"),
                Err(err) => error!(error = %err, "persistence task panicked"),
            }
        });
    }
}
