//! Metrics wrapper (spec §2/§4's outermost stage): records per-request
//! duration and the overall query counter. Per-upstream counters/histograms
//! are recorded inside the chain resolver, which is the only stage that
//! knows which upstream actually answered.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::dns::DnsMessage;
use crate::error::Result;
use crate::metrics::Metrics;

use super::{Pipeline, QueryContext, SourceTag, Stage};

pub struct MetricsStage {
    metrics: Arc<Metrics>,
    next: Pipeline,
}

impl MetricsStage {
    pub fn new(metrics: Arc<Metrics>, next: Pipeline) -> Self {
        MetricsStage { metrics, next }
    }
}

#[async_trait]
impl Stage for MetricsStage {
    async fn resolve(
        &self,
        ctx: &QueryContext,
        query: &DnsMessage,
    ) -> Result<(DnsMessage, SourceTag)> {
        self.metrics.inc_queries();
        let started = Instant::now();
        let result = self.next.resolve(ctx, query).await;
        self.metrics
            .observe_total_duration(started.elapsed().as_secs_f64());
        result
    }
}
