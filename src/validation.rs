//! Semantic validation for manager batch operations (spec §4.8): re-run on
//! every `SetUpstreams`/`SetHosts` call, not just at config load time, so
//! the structural `Config` loader in `config.rs` can stay a thin opaque
//! loader.

use crate::error::{ResolverError, Result};
use crate::hosts::{self, HostOverride};
use crate::upstream::UpstreamDescriptor;

/// Rejects the whole batch if any entry has an empty name, empty address,
/// or negative weight (spec §4.8). Weights `<= 0` are otherwise normalized
/// to 1 by the caller after validation passes (spec §3).
pub fn validate_upstreams(upstreams: &[UpstreamDescriptor]) -> Result<()> {
    if upstreams.is_empty() {
        return Err(ResolverError::InvalidConfig(
            "at least one upstream must be configured".into(),
        ));
    }
    for upstream in upstreams {
        if upstream.name.trim().is_empty() {
            return Err(ResolverError::InvalidConfig(
                "upstream name must not be empty".into(),
            ));
        }
        if upstream.address.trim().is_empty() {
            return Err(ResolverError::InvalidConfig(format!(
                "upstream {:?} has an empty address",
                upstream.name
            )));
        }
        if upstream.weight < 0 {
            return Err(ResolverError::InvalidConfig(format!(
                "upstream {:?} has a negative weight",
                upstream.name
            )));
        }
    }
    Ok(())
}

/// Normalizes weights `<= 0` to 1 (spec §3 "weights default to 1 when
/// ≤ 0"). Call only after `validate_upstreams` has passed.
pub fn normalize_upstream_weights(upstreams: &mut [UpstreamDescriptor]) {
    for upstream in upstreams {
        if upstream.weight <= 0 {
            upstream.weight = 1;
        }
    }
}

pub fn validate_hosts(overrides: &[HostOverride]) -> Result<()> {
    hosts::validate_batch(overrides)
}
