//! Budget Guard — aggregates per-instance cost/token metrics into running
//! session totals and trips a pause when a configured cap is exceeded.
//! A policy event, not an error: tripping pauses work and fires a
//! notification callback rather than failing the session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{InstanceId, InstanceMetrics};

#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetLimits {
    pub max_total_cost_usd: Option<f64>,
    pub max_tokens_per_instance: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetTotals {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Default, Clone, Copy)]
struct InstanceSnapshot {
    tokens: u64,
    cost_usd: f64,
}

/// Per-instance last-seen snapshots, re-summed on every `record` call. The
/// supervisor reports cumulative totals per instance (not deltas), so a
/// later snapshot simply replaces the earlier one in the running sum.
pub struct BudgetGuard {
    limits: BudgetLimits,
    snapshots: HashMap<InstanceId, InstanceSnapshot>,
}

impl BudgetGuard {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            snapshots: HashMap::new(),
        }
    }

    pub fn totals(&self) -> BudgetTotals {
        BudgetTotals {
            total_tokens: self.snapshots.values().map(|s| s.tokens).sum(),
            total_cost_usd: self.snapshots.values().map(|s| s.cost_usd).sum(),
        }
    }

    /// Fold an instance's latest metrics snapshot into the running totals
    /// and report whether a cap is now tripped.
    pub fn record(&mut self, instance: &InstanceId, metrics: &InstanceMetrics) -> bool {
        let tokens =
            metrics.input_tokens + metrics.output_tokens + metrics.cache_read_tokens + metrics.cache_write_tokens;
        let cost = metrics.cost_usd.unwrap_or(0.0);
        self.snapshots.insert(instance.clone(), InstanceSnapshot { tokens, cost_usd: cost });
        self.is_tripped()
    }

    pub fn is_tripped(&self) -> bool {
        let total_cost: f64 = self.snapshots.values().map(|s| s.cost_usd).sum();
        let cost_tripped = self.limits.max_total_cost_usd.is_some_and(|cap| total_cost > cap);
        let token_tripped = self
            .limits
            .max_tokens_per_instance
            .is_some_and(|cap| self.snapshots.values().any(|s| s.tokens > cap));
        cost_tripped || token_tripped
    }
}
