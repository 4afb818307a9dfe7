//! Parses an agent's self-reported cost/token lines out of captured
//! terminal output, aggregating across every usage line in a capture
//! batch and backfilling a cost estimate from a tariff when the agent
//! reports none.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{CostTariff, InstanceMetrics};

fn usage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)
            tokens:\s*
            in=(?P<input>\d+)\s*
            out=(?P<output>\d+)
            (?:\s*cache_read=(?P<cache_read>\d+))?
            (?:\s*cache_write=(?P<cache_write>\d+))?
            (?:\s*cost=\$(?P<cost>[0-9.]+))?
            ",
        )
        .expect("static usage pattern compiles")
    })
}

/// Parse every usage line in `tail`, returning the aggregate across all
/// matches (an instance may emit several batches per capture).
pub fn parse_usage(tail: &str) -> Option<InstanceMetrics> {
    let pattern = usage_pattern();
    let mut found = false;
    let mut metrics = InstanceMetrics::default();
    for caps in pattern.captures_iter(tail) {
        found = true;
        metrics.input_tokens += caps["input"].parse::<u64>().unwrap_or(0);
        metrics.output_tokens += caps["output"].parse::<u64>().unwrap_or(0);
        metrics.cache_read_tokens += caps
            .name("cache_read")
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0);
        metrics.cache_write_tokens += caps
            .name("cache_write")
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0);
        metrics.api_calls += 1;
        if let Some(cost) = caps.name("cost").and_then(|m| m.as_str().parse::<f64>().ok()) {
            metrics.cost_usd = Some(metrics.cost_usd.unwrap_or(0.0) + cost);
        }
    }
    found.then_some(metrics)
}

/// Fill in `metrics.cost_usd` from `tariff` when the agent did not report
/// a cost figure of its own.
pub fn backfill_cost(metrics: &mut InstanceMetrics, tariff: &CostTariff) {
    if metrics.cost_usd.is_none() {
        metrics.cost_usd = Some(tariff.estimate_usd(metrics));
    }
}
