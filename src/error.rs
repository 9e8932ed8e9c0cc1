//! Unified error type for the resolver core, grounded on the teacher's
//! `thiserror`-derived `HeimdallError`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolverError>;

/// Per-upstream exchange failure taxonomy (spec §4.1 "Failure taxonomy").
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream timed out")]
    Timeout,
    #[error("response was truncated")]
    Truncated,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("DoH endpoint returned status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("io error: {0}")]
    Io(String),

    #[error("failed to decode DNS message: {0}")]
    Decode(String),

    #[error("no upstream resolvers are configured")]
    NoUpstreamsConfigured,

    #[error("all upstream resolvers failed: {0}")]
    AllUpstreamsFailed(UpstreamError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("failed to bind listener on {0}: {1}")]
    BindFailed(String, String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to persist state: {0}")]
    Persist(String),

    #[error("query was cancelled")]
    Cancelled,
}

impl From<std::io::Error> for ResolverError {
    fn from(err: std::io::Error) -> Self {
        ResolverError::Io(err.to_string())
    }
}
