//! Tag enrichment for telemetry events and metrics.

use super::event::OutcomeSummary;
use crate::context::ResilienceContext;
use std::collections::HashMap;

/// The information available to enrichers when an event or metric is about
/// to be dispatched.
pub struct EnrichmentContext<'a> {
    /// Name of the event or metric being dispatched.
    pub event_name: &'a str,
    /// Name of the builder that produced the pipeline.
    pub builder_name: &'a str,
    /// Name of the reporting strategy, when one is reporting.
    pub strategy_name: Option<&'a str>,
    /// The execution context, when one is in flight.
    pub context: Option<&'a ResilienceContext>,
    /// The outcome summary, when the event carries one.
    pub outcome: Option<&'a OutcomeSummary>,
}

/// A user-supplied function that augments telemetry tags.
///
/// Enrichers run synchronously before the event or metric reaches any sink.
pub trait Enricher: Send + Sync {
    /// Adds tags for the dispatch described by `ctx`.
    fn enrich(&self, ctx: &EnrichmentContext<'_>, tags: &mut HashMap<String, String>);
}

impl<F> Enricher for F
where
    F: Fn(&EnrichmentContext<'_>, &mut HashMap<String, String>) + Send + Sync,
{
    fn enrich(&self, ctx: &EnrichmentContext<'_>, tags: &mut HashMap<String, String>) {
        self(ctx, tags);
    }
}
