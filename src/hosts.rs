//! Static host-override data model (spec §3 "Host override", §4.4).

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::dns::name::is_valid_domain_or_wildcard;
use crate::error::{ResolverError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostOverride {
    pub pattern: String,
    #[serde(default)]
    pub a: Vec<Ipv4Addr>,
    #[serde(default)]
    pub aaaa: Vec<Ipv6Addr>,
    #[serde(default)]
    pub ttl: u32,
}

/// Maximum TTL accepted for a host override (2^31 - 1, spec §3).
pub const MAX_HOST_TTL: u32 = 2_147_483_647;

impl HostOverride {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_domain_or_wildcard(&self.pattern) {
            return Err(ResolverError::InvalidConfig(format!(
                "host override pattern {:?} is not a valid domain or wildcard",
                self.pattern
            )));
        }
        if self.a.is_empty() && self.aaaa.is_empty() {
            return Err(ResolverError::InvalidConfig(format!(
                "host override {:?} has neither A nor AAAA records",
                self.pattern
            )));
        }
        if self.ttl > MAX_HOST_TTL {
            return Err(ResolverError::InvalidConfig(format!(
                "host override {:?} ttl {} exceeds maximum",
                self.pattern, self.ttl
            )));
        }
        Ok(())
    }
}

/// Validates a full batch atomically: spec §4.8 — `SetHosts` rejects the
/// whole batch if count > 1000 or any entry fails `HostOverride::validate`.
pub fn validate_batch(overrides: &[HostOverride]) -> Result<()> {
    if overrides.len() > 1000 {
        return Err(ResolverError::InvalidConfig(format!(
            "host override batch of {} exceeds the 1000-entry limit",
            overrides.len()
        )));
    }
    for entry in overrides {
        entry.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_override_with_no_records() {
        let bad = HostOverride {
            pattern: "*.internal".into(),
            a: vec![],
            aaaa: vec![],
            ttl: 60,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn rejects_batch_over_limit() {
        let overrides: Vec<HostOverride> = (0..1001)
            .map(|i| HostOverride {
                pattern: format!("host{i}.example"),
                a: vec![Ipv4Addr::new(10, 0, 0, 1)],
                aaaa: vec![],
                ttl: 60,
            })
            .collect();
        assert!(validate_batch(&overrides).is_err());
    }

    #[test]
    fn accepts_well_formed_override() {
        let good = HostOverride {
            pattern: "*.internal".into(),
            a: vec![Ipv4Addr::new(10, 0, 0, 5)],
            aaaa: vec![],
            ttl: 120,
        };
        assert!(good.validate().is_ok());
    }
}
