//! Structural configuration loading (spec §6.3/§6.5): a thin, opaque loader
//! that parses and type-checks a TOML document and writes it back out. The
//! *semantic* validation rules (upstream batch shape, host override shape)
//! deliberately do not live here — they live in `validation.rs`/`hosts.rs`
//! and are re-run on every manager set-op, not just at load time.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ResolverError, Result};
use crate::hosts::HostOverride;
use crate::rules::RuleGroup;
use crate::upstream::UpstreamDescriptor;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenConfig {
    pub udp: String,
    pub tcp: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            udp: ":53".into(),
            tcp: ":53".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: usize,
    #[serde(default = "default_min_ttl")]
    pub min_ttl_seconds: u32,
    #[serde(default = "default_max_ttl")]
    pub max_ttl_seconds: u32,
    #[serde(default = "default_true")]
    pub serve_stale: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: default_max_entries(),
            max_size_mb: default_max_size_mb(),
            min_ttl_seconds: default_min_ttl(),
            max_ttl_seconds: default_max_ttl(),
            serve_stale: true,
        }
    }
}

impl CacheConfig {
    pub fn max_bytes(&self) -> usize {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    /// Swaps `min_ttl_seconds`/`max_ttl_seconds` if misordered (spec §6.3
    /// "Invariant min_ttl ≤ max_ttl, normalized on load").
    fn normalize(&mut self) {
        if self.min_ttl_seconds > self.max_ttl_seconds {
            std::mem::swap(&mut self.min_ttl_seconds, &mut self.max_ttl_seconds);
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_entries() -> usize {
    10_000
}
fn default_max_size_mb() -> usize {
    32
}
fn default_min_ttl() -> u32 {
    60
}
fn default_max_ttl() -> u32 {
    3600
}
fn default_history_entries() -> usize {
    500
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            max_entries: default_history_entries(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub upstreams: Vec<UpstreamDescriptor>,
    #[serde(default)]
    pub rule_groups: Vec<RuleGroup>,
    #[serde(default)]
    pub hosts: Vec<HostOverride>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Parses and structurally validates a config document. Semantic
    /// validation (§4.8) happens when the loaded upstreams/hosts are handed
    /// to the managers, not here.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ResolverError::InvalidConfig(format!("reading {:?}: {e}", path)))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(raw)
            .map_err(|e| ResolverError::InvalidConfig(format!("parsing config: {e}")))?;
        if config.listen.udp.is_empty() || config.listen.tcp.is_empty() {
            return Err(ResolverError::InvalidConfig(
                "listen.udp and listen.tcp are both required".into(),
            ));
        }
        config.cache.normalize();
        Ok(config)
    }

    /// Atomic write-then-rename with `0600` permissions on Unix (spec §6.5).
    /// Best-effort: callers persist asynchronously and log failures rather
    /// than stalling the request path (spec §4.8 "Persistence").
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = toml::to_string_pretty(self)
            .map_err(|e| ResolverError::Persist(format!("serializing config: {e}")))?;

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, body)
            .map_err(|e| ResolverError::Persist(format!("writing {:?}: {e}", tmp_path)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| ResolverError::Persist(format!("chmod {:?}: {e}", tmp_path)))?;
        }

        std::fs::rename(&tmp_path, path)
            .map_err(|e| ResolverError::Persist(format!("renaming into {:?}: {e}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_listen_addresses() {
        let raw = "listen = { udp = \"\", tcp = \":53\" }\n";
        assert!(Config::parse(raw).is_err());
    }

    #[test]
    fn normalizes_swapped_ttl_bounds() {
        let raw = r#"
            [listen]
            udp = ":53"
            tcp = ":53"
            [cache]
            min_ttl_seconds = 3600
            max_ttl_seconds = 60
        "#;
        let config = Config::parse(raw).unwrap();
        assert_eq!(config.cache.min_ttl_seconds, 60);
        assert_eq!(config.cache.max_ttl_seconds, 3600);
    }

    #[test]
    fn parses_full_document() {
        let raw = r#"
            [listen]
            udp = ":53"
            tcp = ":53"

            [[upstreams]]
            name = "cloudflare"
            address = "1.1.1.1:53"
            weight = 10

            [[rule_groups]]
            name = "vpn"
            via = "wg0"
            patterns = ["*.vpn.example"]
            pin_ttl = true

            [[hosts]]
            pattern = "*.internal"
            a = ["10.0.0.5"]
            ttl = 120
        "#;
        let config = Config::parse(raw).unwrap();
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.rule_groups.len(), 1);
        assert_eq!(config.hosts.len(), 1);
    }
}
